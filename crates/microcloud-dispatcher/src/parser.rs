use std::sync::LazyLock;

use regex::Regex;

use microcloud_common::SshDetails;

const SSH_PREFIX: &str = "SSH Command:";
const PASSWORD_PREFIX: &str = "Password:";

static SSH_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"ssh\s+root@([A-Za-z0-9.\-]+)\s+-p\s+(\d+)")
        .expect("ssh command pattern is valid")
});

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("missing `{0}` line in remote output")]
    MissingLine(&'static str),

    #[error("unrecognised ssh command line: {0:?}")]
    BadSshLine(String),

    #[error("empty password in remote output")]
    EmptyCredential,
}

/// Extract the connection details from the provisioning command's stdout.
///
/// Expects one line starting with `SSH Command:` of the form
/// `ssh root@<host> -p <port>` and one starting with `Password:`. Other lines
/// are ignored; when a prefix repeats, the last line wins.
pub fn parse_output(raw: &str) -> Result<SshDetails, ParseError> {
    let mut ssh_line = None;
    let mut password_line = None;
    for line in raw.lines().map(str::trim) {
        if line.starts_with(SSH_PREFIX) {
            ssh_line = Some(line);
        } else if line.starts_with(PASSWORD_PREFIX) {
            password_line = Some(line);
        }
    }
    let ssh_line = ssh_line.ok_or(ParseError::MissingLine(SSH_PREFIX))?;
    let password_line = password_line.ok_or(ParseError::MissingLine(PASSWORD_PREFIX))?;

    let caps = SSH_LINE
        .captures(ssh_line)
        .ok_or_else(|| ParseError::BadSshLine(ssh_line.to_string()))?;
    let address = caps[1].to_string();
    let port: u16 = caps[2]
        .parse()
        .map_err(|_| ParseError::BadSshLine(ssh_line.to_string()))?;

    let credential = password_line
        .split_once(':')
        .map(|(_, rest)| rest.trim())
        .unwrap_or("");
    if credential.is_empty() {
        return Err(ParseError::EmptyCredential);
    }

    Ok(SshDetails {
        address,
        port,
        credential: credential.to_string(),
    })
}
