use super::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SelectorAttrCondition {
    Exists { key: String },
    Eq { key: String, value: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct SelectorStep {
    pub(crate) tag: Option<String>,
    pub(crate) universal: bool,
    pub(crate) id: Option<String>,
    pub(crate) classes: Vec<String>,
    pub(crate) attrs: Vec<SelectorAttrCondition>,
    pub(crate) not: Vec<Vec<SelectorStep>>,
}

/// Parses a comma separated list of compound selectors. Combinators are not
/// supported; the replay shims only ever need compound queries.
pub(crate) fn parse_selector_groups(selector: &str) -> Result<Vec<SelectorStep>> {
    let groups = split_selector_groups(selector)?;
    groups
        .iter()
        .map(|group| parse_selector_step(group.trim()))
        .collect()
}

fn split_selector_groups(selector: &str) -> Result<Vec<String>> {
    let mut groups = Vec::new();
    let mut current = String::new();
    let mut bracket_depth = 0usize;
    let mut paren_depth = 0usize;
    let mut quote: Option<char> = None;

    for ch in selector.chars() {
        if let Some(q) = quote {
            current.push(ch);
            if ch == q {
                quote = None;
            }
            continue;
        }
        match ch {
            '"' | '\'' => {
                quote = Some(ch);
                current.push(ch);
            }
            '[' => {
                bracket_depth += 1;
                current.push(ch);
            }
            ']' => {
                bracket_depth = bracket_depth
                    .checked_sub(1)
                    .ok_or_else(|| Error::UnsupportedSelector(selector.into()))?;
                current.push(ch);
            }
            '(' => {
                paren_depth += 1;
                current.push(ch);
            }
            ')' => {
                paren_depth = paren_depth
                    .checked_sub(1)
                    .ok_or_else(|| Error::UnsupportedSelector(selector.into()))?;
                current.push(ch);
            }
            ',' if bracket_depth == 0 && paren_depth == 0 => {
                if current.trim().is_empty() {
                    return Err(Error::UnsupportedSelector(selector.into()));
                }
                groups.push(std::mem::take(&mut current));
            }
            _ => current.push(ch),
        }
    }

    if quote.is_some() || bracket_depth != 0 || paren_depth != 0 || current.trim().is_empty() {
        return Err(Error::UnsupportedSelector(selector.into()));
    }
    groups.push(current);
    Ok(groups)
}

fn parse_selector_step(part: &str) -> Result<SelectorStep> {
    let unsupported = || Error::UnsupportedSelector(part.to_string());
    let bytes = part.as_bytes();
    let mut step = SelectorStep::default();
    let mut i = 0usize;

    if part.is_empty() {
        return Err(unsupported());
    }

    if bytes[0] == b'*' {
        step.universal = true;
        i = 1;
    } else if is_selector_ident_char(bytes[0]) {
        let (tag, next) = parse_selector_ident(part, 0).ok_or_else(unsupported)?;
        step.tag = Some(tag.to_ascii_lowercase());
        i = next;
    }

    while i < bytes.len() {
        match bytes[i] {
            b'#' => {
                let (id, next) = parse_selector_ident(part, i + 1).ok_or_else(unsupported)?;
                step.id = Some(id);
                i = next;
            }
            b'.' => {
                let (class, next) = parse_selector_ident(part, i + 1).ok_or_else(unsupported)?;
                step.classes.push(class);
                i = next;
            }
            b'[' => {
                let end = part[i..].find(']').map(|pos| i + pos).ok_or_else(unsupported)?;
                let condition = parse_selector_attr_condition(&part[i + 1..end])
                    .ok_or_else(unsupported)?;
                step.attrs.push(condition);
                i = end + 1;
            }
            b':' => {
                let rest = &part[i + 1..];
                if !rest.starts_with("not(") {
                    return Err(unsupported());
                }
                let open = i + 4;
                let close = find_matching_paren(part, open).ok_or_else(unsupported)?;
                let inner = parse_selector_groups(&part[open + 1..close])?;
                step.not.push(inner);
                i = close + 1;
            }
            _ => return Err(unsupported()),
        }
    }

    Ok(step)
}

fn find_matching_paren(src: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    for (offset, b) in src.as_bytes()[open..].iter().enumerate() {
        if let Some(q) = quote {
            if *b == q {
                quote = None;
            }
            continue;
        }
        match b {
            b'"' | b'\'' => quote = Some(*b),
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + offset);
                }
            }
            _ => {}
        }
    }
    None
}

fn parse_selector_ident(src: &str, start: usize) -> Option<(String, usize)> {
    let bytes = src.as_bytes();
    let mut end = start;
    while end < bytes.len() && is_selector_ident_char(bytes[end]) {
        end += 1;
    }
    if end == start {
        return None;
    }
    Some((src[start..end].to_string(), end))
}

fn is_selector_ident_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'-' || b == b'_'
}

fn parse_selector_attr_condition(raw: &str) -> Option<SelectorAttrCondition> {
    let raw = raw.trim();
    let Some(eq) = raw.find('=') else {
        if raw.is_empty() || !raw.bytes().all(is_attr_key_char) {
            return None;
        }
        return Some(SelectorAttrCondition::Exists {
            key: raw.to_ascii_lowercase(),
        });
    };

    let key = raw[..eq].trim();
    if key.is_empty() || !key.bytes().all(is_attr_key_char) {
        return None;
    }
    let value = raw[eq + 1..].trim();
    let value = if (value.starts_with('"') && value.ends_with('"') && value.len() >= 2)
        || (value.starts_with('\'') && value.ends_with('\'') && value.len() >= 2)
    {
        &value[1..value.len() - 1]
    } else {
        value
    };
    Some(SelectorAttrCondition::Eq {
        key: key.to_ascii_lowercase(),
        value: value.to_string(),
    })
}

fn is_attr_key_char(b: u8) -> bool {
    is_selector_ident_char(b) || b == b':'
}

impl Dom {
    pub(crate) fn matches_compound(&self, node_id: NodeId, step: &SelectorStep) -> bool {
        let Some(element) = self.element(node_id) else {
            return false;
        };
        if let Some(tag) = &step.tag {
            if !element.tag_name.eq_ignore_ascii_case(tag) {
                return false;
            }
        }
        if let Some(id) = &step.id {
            if element.attrs.get("id") != Some(id) {
                return false;
            }
        }
        if !step.classes.is_empty() {
            let classes = element
                .attrs
                .get("class")
                .map(|raw| raw.split_whitespace().collect::<Vec<_>>())
                .unwrap_or_default();
            if !step.classes.iter().all(|class| classes.contains(&class.as_str())) {
                return false;
            }
        }
        for condition in &step.attrs {
            let matched = match condition {
                SelectorAttrCondition::Exists { key } => element.attrs.contains_key(key),
                SelectorAttrCondition::Eq { key, value } => element.attrs.get(key) == Some(value),
            };
            if !matched {
                return false;
            }
        }
        step.not.iter().all(|groups| {
            !groups
                .iter()
                .any(|inner| self.matches_compound(node_id, inner))
        })
    }
}
