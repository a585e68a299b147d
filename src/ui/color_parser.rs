use ratatui::style::Color;

/// Accepts named terminal colors, `r,g,b` triples and `#rrggbb` hex.
/// Anything else falls back to `Color::Reset`.
pub fn parse_color(s: &str) -> Color {
    let s = s.trim().to_lowercase();
    match s.as_str() {
        "reset" => Color::Reset,
        "black" => Color::Black,
        "red" => Color::Red,
        "green" => Color::Green,
        "yellow" => Color::Yellow,
        "blue" => Color::Blue,
        "magenta" => Color::Magenta,
        "cyan" => Color::Cyan,
        "gray" | "grey" => Color::Gray,
        "darkgray" | "darkgrey" => Color::DarkGray,
        "lightred" => Color::LightRed,
        "lightgreen" => Color::LightGreen,
        "lightyellow" => Color::LightYellow,
        "lightblue" => Color::LightBlue,
        "lightmagenta" => Color::LightMagenta,
        "lightcyan" => Color::LightCyan,
        "white" => Color::White,
        _ => parse_hex(&s).or_else(|| parse_triple(&s)).unwrap_or(Color::Reset),
    }
}

fn parse_hex(s: &str) -> Option<Color> {
    let hex = s.strip_prefix('#')?;
    if hex.len() != 6 || !hex.is_ascii() {
        return None;
    }
    let channel = |range: std::ops::Range<usize>| u8::from_str_radix(&hex[range], 16).ok();
    Some(Color::Rgb(channel(0..2)?, channel(2..4)?, channel(4..6)?))
}

fn parse_triple(s: &str) -> Option<Color> {
    let parts: Vec<&str> = s.split(',').collect();
    match parts.as_slice() {
        [r, g, b] => Some(Color::Rgb(
            r.trim().parse().ok()?,
            g.trim().parse().ok()?,
            b.trim().parse().ok()?,
        )),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::parse_color;
    use ratatui::style::Color;

    #[test]
    fn parses_named_colors_case_insensitive() {
        assert_eq!(parse_color("Cyan"), Color::Cyan);
        assert_eq!(parse_color("LIGHTRED"), Color::LightRed);
        assert_eq!(parse_color("grey"), Color::Gray);
    }

    #[test]
    fn parses_rgb_triples_and_hex() {
        assert_eq!(parse_color(" 220, 220 ,220 "), Color::Rgb(220, 220, 220));
        assert_eq!(parse_color("#FF8000"), Color::Rgb(255, 128, 0));
    }

    #[test]
    fn invalid_values_fall_back_to_reset() {
        assert_eq!(parse_color("teal-ish"), Color::Reset);
        assert_eq!(parse_color("#12345"), Color::Reset);
        assert_eq!(parse_color("300,0,0"), Color::Reset);
        assert_eq!(parse_color("1,2"), Color::Reset);
    }
}
