//! Textual minifier for generated code: drops `//` and `/* */` comments and
//! collapses whitespace, leaving string literals untouched. It knows nothing
//! about JavaScript regex literals, which the generators never emit.

fn is_word(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_' || ch == '$' || ch == '.' || ch == '#'
}

/// Whether dropping the whitespace between `prev` and `next` would merge two
/// tokens into a different one.
fn needs_space(prev: char, next: char) -> bool {
    (is_word(prev) && is_word(next)) || (prev == next && "+-<>/=&|".contains(prev))
}

fn flush_space(out: &mut String, pending: &mut bool, next: char) {
    if std::mem::take(pending) {
        if let Some(prev) = out.chars().last() {
            if needs_space(prev, next) {
                out.push(' ');
            }
        }
    }
}

pub fn minify(source: &str) -> String {
    let chars: Vec<char> = source.chars().collect();
    let mut out = String::with_capacity(source.len());
    let mut pending_space = false;
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        let next = chars.get(i + 1).copied();

        if ch == '/' && next == Some('/') {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            pending_space = true;
            continue;
        }
        if ch == '/' && next == Some('*') {
            i += 2;
            while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                i += 1;
            }
            i = (i + 2).min(chars.len());
            pending_space = true;
            continue;
        }
        if ch.is_whitespace() {
            pending_space = true;
            i += 1;
            continue;
        }

        flush_space(&mut out, &mut pending_space, ch);

        if ch == '"' || ch == '\'' || ch == '`' {
            let quote = ch;
            out.push(ch);
            i += 1;
            while i < chars.len() {
                let c = chars[i];
                out.push(c);
                i += 1;
                if c == '\\' {
                    if let Some(escaped) = chars.get(i) {
                        out.push(*escaped);
                        i += 1;
                    }
                } else if c == quote {
                    break;
                }
            }
            continue;
        }

        out.push(ch);
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_comments_and_collapses_whitespace() {
        let source = "// header\nfn main() {\n    let x = 1.0; /* inline */\n    return x;\n}\n";
        assert_eq!(minify(source), "fn main(){let x=1.0;return x;}");
    }

    #[test]
    fn leaves_string_literals_alone() {
        let source = "const url = \"https://example.com  // not a comment\";\nconst s = 'a  /* b */';";
        assert_eq!(
            minify(source),
            "const url=\"https://example.com  // not a comment\";const s='a  /* b */';"
        );
    }

    #[test]
    fn keeps_tokens_apart() {
        assert_eq!(minify("a - -b"), "a- -b");
        assert_eq!(minify("x + +y"), "x+ +y");
        assert_eq!(minify("return  value"), "return value");
        assert_eq!(minify("const s = \"say \\\"hi\\\"\";"), "const s=\"say \\\"hi\\\"\";");
    }
}
