//! `t:` transformations applied to values before matching.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transformation {
    Lowercase,
    Uppercase,
    UrlDecode,
    Trim,
    CompressWhitespace,
    RemoveWhitespace,
    RemoveNulls,
}

impl Transformation {
    /// Parses a transformation name. `Ok(None)` means `t:none`.
    pub fn parse(name: &str) -> Result<Option<Self>, String> {
        let t = match name.to_ascii_lowercase().as_str() {
            "none" => return Ok(None),
            "lowercase" => Transformation::Lowercase,
            "uppercase" => Transformation::Uppercase,
            "urldecode" | "urldecodeuni" => Transformation::UrlDecode,
            "trim" => Transformation::Trim,
            "compresswhitespace" => Transformation::CompressWhitespace,
            "removewhitespace" => Transformation::RemoveWhitespace,
            "removenulls" => Transformation::RemoveNulls,
            other => return Err(format!("unsupported transformation 't:{other}'")),
        };
        Ok(Some(t))
    }

    pub fn apply(self, value: &str) -> String {
        match self {
            Transformation::Lowercase => value.to_lowercase(),
            Transformation::Uppercase => value.to_uppercase(),
            Transformation::UrlDecode => {
                let spaced = value.replace('+', " ");
                String::from_utf8_lossy(&urlencoding::decode_binary(spaced.as_bytes()))
                    .into_owned()
            }
            Transformation::Trim => value.trim().to_string(),
            Transformation::CompressWhitespace => {
                value.split_whitespace().collect::<Vec<_>>().join(" ")
            }
            Transformation::RemoveWhitespace => {
                value.chars().filter(|c| !c.is_whitespace()).collect()
            }
            Transformation::RemoveNulls => value.chars().filter(|c| *c != '\0').collect(),
        }
    }
}

/// Applies a pipeline in order.
pub fn apply_all(transforms: &[Transformation], value: &str) -> String {
    transforms
        .iter()
        .fold(value.to_string(), |acc, t| t.apply(&acc))
}
