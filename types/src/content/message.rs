use crate::content::parts::Part;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

/// One conversational turn, or a system instruction when `role` is absent.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,

    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    pub fn user(parts: Vec<Part>) -> Self {
        Self {
            role: Some(Role::User),
            parts,
        }
    }

    pub fn instruction(text: &str) -> Self {
        Self {
            role: None,
            parts: vec![Part::text(text)],
        }
    }

    /// Concatenated text of every non-thought text part.
    pub fn text(&self) -> Option<String> {
        let texts: Vec<&str> = self
            .parts
            .iter()
            .filter(|part| part.thought != Some(true))
            .filter_map(|part| part.text.as_deref())
            .collect();
        if texts.is_empty() {
            None
        } else {
            Some(texts.concat())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_skips_thoughts_and_media() {
        let content = Content {
            role: Some(Role::Model),
            parts: vec![
                Part::text("Hello"),
                Part {
                    text: Some("(thinking)".to_string()),
                    thought: Some(true),
                    ..Default::default()
                },
                Part::inline(crate::Blob::new("image/png", "AAAA")),
                Part::text(", world"),
            ],
        };
        assert_eq!(content.text().as_deref(), Some("Hello, world"));
        assert_eq!(Content::default().text(), None);
    }
}
