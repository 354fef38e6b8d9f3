/// Fixed literal every recognized secret value is replaced with.
pub const REDACTION_TOKEN: &str = "REDACTED";

/// Redact recognized secret values in dotenv-style content.
///
/// Keys and line positions are preserved so a restore can tell which
/// secrets need manual re-entry; keys not on the recognized list pass
/// through verbatim.
pub fn redact_env(content: &str, secret_keys: &[String]) -> String {
    let mut out: String = content
        .lines()
        .map(|line| redact_line(line, secret_keys))
        .collect::<Vec<_>>()
        .join("\n");
    if content.ends_with('\n') {
        out.push('\n');
    }
    out
}

fn redact_line(line: &str, secret_keys: &[String]) -> String {
    let trimmed = line.trim_start();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return line.to_string();
    }
    let Some(eq) = line.find('=') else {
        return line.to_string();
    };
    let key = line[..eq].trim();
    if secret_keys.iter().any(|k| k == key) {
        format!("{}={}", &line[..eq], REDACTION_TOKEN)
    } else {
        line.to_string()
    }
}
