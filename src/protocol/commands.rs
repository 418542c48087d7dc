//! Module `commands`
//!
//! Turns a decoded protocol line into a tagged [`Command`] in one parse
//! step. Control commands start with `*` and are matched as whole leading
//! tokens; everything else is credentials (before login) or chat text.

pub const LOGOUT: &str = "*Logout";
pub const GET_FILE_LIST: &str = "*Get file list";
pub const FILE_UPLOAD_PREFIX: &str = "*File upload-";
pub const FILE_DOWNLOAD_PREFIX: &str = "*File download-";

const COMMAND_SIGIL: char = '*';
const CREDENTIAL_SEPARATOR: char = ':';

/// Represents a protocol command received from a client.
#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    Credentials { username: String, password: String },
    Logout,
    ListFiles,
    Upload { filename: String, size: u64 },
    Download { filename: String },
    Chat(String),
    /// A `*` line that matches no command.
    Unknown(String),
    /// An upload header whose filename or size field is missing or invalid.
    MalformedHeader(String),
}

/// Parses a raw line into the `Command` enum.
///
/// `authenticated` tells whether the connection already has a session:
/// only unauthenticated connections send credentials, so once logged in a
/// line such as `note: see above` is plain chat.
pub fn parse_command(line: &str, authenticated: bool) -> Command {
    if line.starts_with(COMMAND_SIGIL) {
        return parse_control(line);
    }

    if !authenticated {
        if let Some((username, password)) = line.split_once(CREDENTIAL_SEPARATOR) {
            return Command::Credentials {
                username: username.to_string(),
                password: password.to_string(),
            };
        }
    }

    Command::Chat(line.to_string())
}

fn parse_control(line: &str) -> Command {
    if line == LOGOUT {
        return Command::Logout;
    }
    if line == GET_FILE_LIST {
        return Command::ListFiles;
    }

    if let Some(rest) = line.strip_prefix(FILE_UPLOAD_PREFIX) {
        // The size is the last field so filenames may contain '-'.
        return match rest.rsplit_once('-') {
            Some((filename, size)) if !filename.is_empty() => match size.parse::<u64>() {
                Ok(size) => Command::Upload {
                    filename: filename.to_string(),
                    size,
                },
                Err(_) => Command::MalformedHeader(line.to_string()),
            },
            _ => Command::MalformedHeader(line.to_string()),
        };
    }

    if let Some(filename) = line.strip_prefix(FILE_DOWNLOAD_PREFIX) {
        return Command::Download {
            filename: filename.to_string(),
        };
    }

    Command::Unknown(line.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_control_commands() {
        assert_eq!(parse_command("*Logout", true), Command::Logout);
        assert_eq!(parse_command("*Get file list", false), Command::ListFiles);
        assert_eq!(
            parse_command("*File upload-report.pdf-2048", false),
            Command::Upload {
                filename: "report.pdf".to_string(),
                size: 2048
            }
        );
        assert_eq!(
            parse_command("*File download-report.pdf", true),
            Command::Download {
                filename: "report.pdf".to_string()
            }
        );
    }

    #[test]
    fn test_upload_filename_with_dashes() {
        assert_eq!(
            parse_command("*File upload-my-notes-v2.txt-10", false),
            Command::Upload {
                filename: "my-notes-v2.txt".to_string(),
                size: 10
            }
        );
    }

    #[test]
    fn test_malformed_upload_headers() {
        assert_eq!(
            parse_command("*File upload-report.pdf", false),
            Command::MalformedHeader("*File upload-report.pdf".to_string())
        );
        assert_eq!(
            parse_command("*File upload-a.txt-lots", false),
            Command::MalformedHeader("*File upload-a.txt-lots".to_string())
        );
        assert_eq!(
            parse_command("*File upload--12", false),
            Command::MalformedHeader("*File upload--12".to_string())
        );
    }

    #[test]
    fn test_credentials_only_before_login() {
        assert_eq!(
            parse_command("alice:pw1", false),
            Command::Credentials {
                username: "alice".to_string(),
                password: "pw1".to_string()
            }
        );
        assert_eq!(
            parse_command("alice:pw1", true),
            Command::Chat("alice:pw1".to_string())
        );
    }

    #[test]
    fn test_password_may_contain_separator() {
        assert_eq!(
            parse_command("bob:a:b", false),
            Command::Credentials {
                username: "bob".to_string(),
                password: "a:b".to_string()
            }
        );
    }

    #[test]
    fn test_markers_inside_chat_are_not_commands() {
        assert_eq!(
            parse_command("how do I use *File upload-x-1 ?", true),
            Command::Chat("how do I use *File upload-x-1 ?".to_string())
        );
        assert_eq!(
            parse_command("please *Logout me", true),
            Command::Chat("please *Logout me".to_string())
        );
    }

    #[test]
    fn test_unknown_star_commands() {
        assert_eq!(
            parse_command("*Dance", true),
            Command::Unknown("*Dance".to_string())
        );
        assert_eq!(
            parse_command("*Logout now", true),
            Command::Unknown("*Logout now".to_string())
        );
    }
}
