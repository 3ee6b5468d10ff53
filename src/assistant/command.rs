//! Parsing of interactive chat input

/// One line of user input in chat mode
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    /// Empty line: start or stop recording
    ToggleRecording,
    /// A typed question
    Question(String),
    /// Start a new chat session
    NewChat,
    /// Clear the active chat session
    ClearChat,
    /// Speak the last answer again
    Repeat,
    /// Change the speech rate
    Rate(f32),
    /// List chat sessions for the current book
    Sessions,
    /// Load a chat session by id
    Load(String),
    /// Announce the help text
    Help,
    /// Leave chat mode
    Quit,
    /// Unrecognized or malformed command
    Invalid(String),
}

/// Spoken help for chat mode
pub const HELP_TEXT: &str = "Voice Assistant Help. Press Enter on an empty line to start or stop \
recording. Type a question and press Enter to ask it. Type slash new for a new chat, slash clear \
to clear the chat, slash repeat to hear the last answer again, slash rate followed by a number to \
change the speech rate, slash sessions to list chats, slash load followed by an id to open one, \
and slash quit to leave.";

impl Input {
    /// Parse one line
    #[must_use]
    pub fn parse(line: &str) -> Self {
        let line = line.trim();

        if line.is_empty() {
            return Self::ToggleRecording;
        }

        let Some(command) = line.strip_prefix('/') else {
            return Self::Question(line.to_string());
        };

        let (name, arg) = command
            .split_once(char::is_whitespace)
            .map_or((command, ""), |(name, arg)| (name, arg.trim()));

        match name.to_ascii_lowercase().as_str() {
            "new" => Self::NewChat,
            "clear" => Self::ClearChat,
            "repeat" => Self::Repeat,
            "rate" => arg.parse().map_or_else(
                |_| Self::Invalid("Usage: /rate <number>, for example /rate 1.5".to_string()),
                Self::Rate,
            ),
            "sessions" => Self::Sessions,
            "load" if !arg.is_empty() => Self::Load(arg.to_string()),
            "load" => Self::Invalid("Usage: /load <session id>".to_string()),
            "help" | "?" => Self::Help,
            "quit" | "exit" | "back" => Self::Quit,
            other => Self::Invalid(format!("Unknown command /{other}. Type /help for help.")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_line_toggles_recording() {
        assert_eq!(Input::parse(""), Input::ToggleRecording);
        assert_eq!(Input::parse("   \n"), Input::ToggleRecording);
    }

    #[test]
    fn test_question() {
        assert_eq!(
            Input::parse("  What is a cell?  "),
            Input::Question("What is a cell?".to_string())
        );
    }

    #[test]
    fn test_commands() {
        assert_eq!(Input::parse("/new"), Input::NewChat);
        assert_eq!(Input::parse("/CLEAR"), Input::ClearChat);
        assert_eq!(Input::parse("/repeat"), Input::Repeat);
        assert_eq!(Input::parse("/rate 1.5"), Input::Rate(1.5));
        assert_eq!(Input::parse("/sessions"), Input::Sessions);
        assert_eq!(Input::parse("/load 12"), Input::Load("12".to_string()));
        assert_eq!(Input::parse("/help"), Input::Help);
        assert_eq!(Input::parse("/quit"), Input::Quit);
    }

    #[test]
    fn test_malformed_commands() {
        assert!(matches!(Input::parse("/rate fast"), Input::Invalid(_)));
        assert!(matches!(Input::parse("/load"), Input::Invalid(_)));
        assert!(matches!(Input::parse("/dance"), Input::Invalid(_)));
    }
}
