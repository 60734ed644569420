use super::ConfigError;

/// Replace `${VAR}`, `${env:VAR}` and `${file:/path}` references in `value`.
///
/// File contents are trimmed. A reference that cannot be resolved is an
/// error, as is an unclosed `${`.
pub fn resolve_placeholders(value: &str) -> Result<String, ConfigError> {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find('}')
            .ok_or_else(|| ConfigError::Load(format!("Unclosed placeholder in: {value}")))?;
        out.push_str(&resolve(after[..end].trim())?);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

fn resolve(reference: &str) -> Result<String, ConfigError> {
    if let Some(path) = reference.strip_prefix("file:") {
        let path = path.trim();
        return std::fs::read_to_string(path)
            .map(|s| s.trim().to_string())
            .map_err(|e| ConfigError::Load(format!("Secret file '{path}': {e}")));
    }
    let var = reference.strip_prefix("env:").unwrap_or(reference).trim();
    std::env::var(var).map_err(|_| ConfigError::NotFound(format!("env:{var}")))
}
