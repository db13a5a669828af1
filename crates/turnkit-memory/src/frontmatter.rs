#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrontMatter {
    pub paths: Vec<String>,
}

/// Split `raw` into an optional front-matter block and the remaining body.
/// Front matter is recognised only when the file begins with `---\n` and a
/// matching closing `---` line follows.
pub fn split(raw: &str) -> (Option<FrontMatter>, String) {
    if !raw.starts_with("---\n") && raw != "---" {
        return (None, raw.to_string());
    }
    let mut lines = raw.lines();
    lines.next(); // leading `---`

    let mut block = String::new();
    let mut closed = false;
    let mut consumed = "---\n".len();
    for line in lines.clone() {
        consumed += line.len() + 1;
        if line.trim() == "---" {
            closed = true;
            break;
        }
        block.push_str(line);
        block.push('\n');
    }

    if !closed {
        return (None, raw.to_string());
    }

    let body = raw.get(consumed.min(raw.len())..).unwrap_or("").to_string();
    let front = parse_block(&block);
    (Some(front), body)
}

fn parse_block(block: &str) -> FrontMatter {
    let value: serde_yaml::Value = match serde_yaml::from_str(block) {
        Ok(v) => v,
        Err(_) => return FrontMatter::default(),
    };
    let paths = match value.get("paths") {
        Some(serde_yaml::Value::Sequence(seq)) => seq
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Some(serde_yaml::Value::String(s)) => {
            s.split(',').map(|p| p.trim().to_string()).filter(|p| !p.is_empty()).collect()
        }
        _ => Vec::new(),
    };
    FrontMatter { paths }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_front_matter_returns_whole_body() {
        let (front, body) = split("just text");
        assert!(front.is_none());
        assert_eq!(body, "just text");
    }

    #[test]
    fn parses_array_form_paths() {
        let (front, body) = split("---\npaths: [\"a\", \"b\"]\n---\nbody text");
        assert_eq!(front.unwrap().paths, vec!["a", "b"]);
        assert_eq!(body, "body text");
    }

    #[test]
    fn parses_comma_separated_paths() {
        let (front, _) = split("---\npaths: a, b\n---\nbody");
        assert_eq!(front.unwrap().paths, vec!["a", "b"]);
    }

    #[test]
    fn unclosed_front_matter_is_treated_as_plain_body() {
        let (front, body) = split("---\npaths: a\nno closer here");
        assert!(front.is_none());
        assert!(body.contains("no closer here"));
    }
}
