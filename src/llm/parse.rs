use serde::de::DeserializeOwned;

use crate::error::ParseError;

/// Strip a surrounding markdown code fence (```json ... ``` or ``` ... ```).
///
/// Returns the input trimmed when no fence is present.
pub fn strip_code_fences(completion: &str) -> &str {
    let trimmed = completion.trim();
    let Some(start) = trimmed.find("```") else {
        return trimmed;
    };
    let after = &trimmed[start + 3..];
    // Skip the info string (e.g. "json") up to the end of the fence line
    let body = match after.find('\n') {
        Some(newline) if !after[..newline].contains('{') && !after[..newline].contains('[') => {
            &after[newline + 1..]
        }
        _ => after.trim_start_matches(|c: char| c.is_ascii_alphabetic()),
    };
    match body.find("```") {
        Some(end) => body[..end].trim(),
        None => body.trim(),
    }
}

/// Parse a structured completion strictly into `T`.
///
/// The raw text is tried first; on failure exactly one normalization pass
/// (fence stripping) is applied before giving up with a [`ParseError`].
pub fn parse_structured<T: DeserializeOwned>(
    completion: &str,
    expected: &'static str,
) -> Result<T, ParseError> {
    let trimmed = completion.trim();
    if trimmed.is_empty() {
        return Err(ParseError::Empty { expected });
    }

    match serde_json::from_str::<T>(trimmed) {
        Ok(value) => Ok(value),
        Err(first) => {
            let stripped = strip_code_fences(trimmed);
            if stripped == trimmed {
                return Err(ParseError::Malformed {
                    expected,
                    message: first.to_string(),
                });
            }
            serde_json::from_str::<T>(stripped).map_err(|e| ParseError::Malformed {
                expected,
                message: e.to_string(),
            })
        }
    }
}
