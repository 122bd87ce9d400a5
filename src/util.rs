/// Split `items` at every element matching `pred`, dropping the matches.
/// Always yields at least one (possibly empty) group.
pub fn split_on<T>(items: &[T], pred: impl Fn(&T) -> bool) -> Vec<&[T]> {
    items.split(pred).collect()
}

/// Strip leading blank lines, then remove the first non-blank line's
/// indentation width from the start of every line.
pub fn dedent(text: &str) -> String {
    let lines: Vec<&str> = text
        .lines()
        .skip_while(|line| line.trim().is_empty())
        .collect();
    let Some(first) = lines.first() else {
        return String::new();
    };
    let indent = first.len() - first.trim_start().len();
    lines
        .iter()
        .map(|line| {
            let cut = line
                .char_indices()
                .take_while(|(i, c)| *i < indent && c.is_whitespace())
                .map(|(i, c)| i + c.len_utf8())
                .last()
                .unwrap_or(0);
            &line[cut..]
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Uppercase base-36 rendering used for list and argument slot names.
pub fn to_base36(mut n: usize) -> String {
    const DIGITS: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    let mut out = Vec::new();
    loop {
        out.push(char::from(DIGITS[n % 36]));
        n /= 36;
        if n == 0 {
            break;
        }
    }
    out.iter().rev().collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn split_always_yields_a_group() {
        let empty: [i32; 0] = [];
        assert_eq!(split_on(&empty, |x| *x == 0), vec![&[] as &[i32]]);
        assert_eq!(split_on(&[1, 2, 3], |x| *x == 0), vec![&[1, 2, 3][..]]);
    }

    #[test]
    fn split_drops_separators() {
        let groups = split_on(&[1, 0, 2, 3, 0], |x| *x == 0);
        assert_eq!(groups, vec![&[1][..], &[2, 3][..], &[][..]]);
    }

    #[test]
    fn dedent_uses_first_line() {
        let text = "\n\n    a = 1\n    if a {\n      b\n    }\n";
        assert_eq!(dedent(text), "a = 1\nif a {\n  b\n}");
    }

    #[test]
    fn dedent_of_blank_text_is_empty() {
        assert_eq!(dedent("\n   \n"), "");
    }

    #[test]
    fn base36() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(10), "A");
        assert_eq!(to_base36(35), "Z");
        assert_eq!(to_base36(36), "10");
    }
}
