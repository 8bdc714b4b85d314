//! Number formatting and text cleanup for report prompts.

/// Two decimal places, used for ratios such as `1.35x`.
pub fn fmt_num(value: f64) -> String {
    if value.is_finite() {
        format!("{value:.2}")
    } else {
        "N/A".to_string()
    }
}

/// Fraction rendered as a percentage with one decimal (`0.125` -> `12.5%`).
pub fn fmt_pct(fraction: f64) -> String {
    if fraction.is_finite() {
        format!("{:.1}%", fraction * 100.0)
    } else {
        "N/A".to_string()
    }
}

/// Amount in millions with the currency code (`12_500_000` -> `USD 12.5M`).
pub fn fmt_currency_mm(amount: f64, ccy: &str) -> String {
    if !amount.is_finite() {
        return "N/A".to_string();
    }
    let millions = amount / 1_000_000.0;
    let rendered = format!("{millions:.1}");
    let rendered = rendered.strip_suffix(".0").unwrap_or(&rendered);
    format!("{ccy} {rendered}M")
}

/// Compound annual growth between the first and last observation, as a
/// percentage. `None` when fewer than two periods or a non-positive start.
pub fn compound_growth(values: &[f64]) -> Option<f64> {
    let (first, last) = (*values.first()?, *values.last()?);
    let periods = values.len().checked_sub(1).filter(|p| *p > 0)?;
    if first <= 0.0 || last < 0.0 {
        return None;
    }
    Some(((last / first).powf(1.0 / periods as f64) - 1.0) * 100.0)
}

/// Removes markdown emphasis, heading markers and backticks that models
/// emit despite being asked for plain text.
pub fn strip_markdown(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for (i, line) in text.lines().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        let trimmed = line.trim_start();
        let line = if trimmed.starts_with('#') {
            trimmed.trim_start_matches('#').trim_start()
        } else {
            line
        };
        out.push_str(&strip_inline(line));
    }
    out.trim().to_string()
}

fn strip_inline(line: &str) -> String {
    let without = line.replace("**", "").replace("__", "").replace('`', "");
    // Single `*` or `_` wrapping a word is italic; a leading "* " is a bullet.
    let mut result = String::with_capacity(without.len());
    let chars: Vec<char> = without.chars().collect();
    for (i, &c) in chars.iter().enumerate() {
        if c == '*' || c == '_' {
            let prev = i.checked_sub(1).map(|j| chars[j]);
            let next = chars.get(i + 1).copied();
            let bullet = c == '*' && prev.map_or(true, char::is_whitespace) && next == Some(' ');
            let inside_word = prev.is_some_and(char::is_alphanumeric) && next.is_some_and(char::is_alphanumeric);
            if bullet {
                result.push('-');
                continue;
            }
            if !inside_word {
                continue;
            }
        }
        result.push(c);
    }
    result
}
