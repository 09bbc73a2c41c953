use clap::{Parser, Subcommand};

/// notifier: real-time notification delivery
#[derive(Parser)]
#[command(name = "notifier", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP/WebSocket server and bus listener
    Serve {
        /// Port to bind (defaults to NOTIFIER_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Create a notification and publish it to connected processes
    Send {
        #[arg(long)]
        user: String,
        /// Notification type tag, e.g. TEAM_ADDED
        #[arg(long = "type")]
        kind: String,
        /// JSON content object
        #[arg(long, default_value = "{}")]
        content: String,
    },

    /// List unread notifications for a user, newest first
    Unread {
        #[arg(long)]
        user: String,
    },

    /// Mark every notification of a user as read
    ReadAll {
        #[arg(long)]
        user: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_parses_type_flag() {
        let cli = Cli::parse_from([
            "notifier",
            "send",
            "--user",
            "user-1",
            "--type",
            "TEAM_ADDED",
            "--content",
            r#"{"teamName":"Eng"}"#,
        ]);
        match cli.command {
            Some(Commands::Send { user, kind, content }) => {
                assert_eq!(user, "user-1");
                assert_eq!(kind, "TEAM_ADDED");
                assert_eq!(content, r#"{"teamName":"Eng"}"#);
            }
            _ => panic!("expected send"),
        }
    }

    #[test]
    fn test_no_subcommand_is_allowed() {
        let cli = Cli::parse_from(["notifier"]);
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_read_all_is_kebab_case() {
        let cli = Cli::parse_from(["notifier", "read-all", "--user", "u"]);
        assert!(matches!(cli.command, Some(Commands::ReadAll { .. })));
    }
}
