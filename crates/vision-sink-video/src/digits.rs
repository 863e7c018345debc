//! A hand-rolled 3x5 bitmap font, just large enough to stamp a frame
//! number onto a raw pixel buffer without pulling in a font-rendering
//! dependency or a bundled font asset.

pub(crate) const GLYPH_WIDTH: usize = 3;
pub(crate) const GLYPH_HEIGHT: usize = 5;

pub(crate) fn glyph_for(c: char) -> [&'static str; GLYPH_HEIGHT] {
    match c {
        '0' => ["###", "# #", "# #", "# #", "###"],
        '1' => [" # ", "## ", " # ", " # ", "###"],
        '2' => ["###", "  #", "###", "#  ", "###"],
        '3' => ["###", "  #", "###", "  #", "###"],
        '4' => ["# #", "# #", "###", "  #", "  #"],
        '5' => ["###", "#  ", "###", "  #", "###"],
        '6' => ["###", "#  ", "###", "# #", "###"],
        '7' => ["###", "  #", "  #", "  #", "  #"],
        '8' => ["###", "# #", "###", "# #", "###"],
        '9' => ["###", "# #", "###", "  #", "###"],
        _ => ["   ", "   ", "   ", "   ", "   "],
    }
}
