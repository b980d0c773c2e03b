use chatwire_protocol::{ConvType, ModelId};

/// One line of user input.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Nothing to do.
    Empty,
    /// A chat turn.
    Say(String),
    /// Switch the conversation mode.
    Mode(ConvType),
    /// Switch the model.
    Model(ModelId),
    /// Leave.
    Quit,
    /// A slash command we don't know, or one with bad arguments.
    Invalid(String),
}

impl Command {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Command::Empty;
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Command::Say(line.to_owned());
        };

        let mut parts = rest.split_whitespace();
        let name = parts.next().unwrap_or_default();
        let arg = parts.next();
        match (name, arg) {
            ("qa", None) => Command::Mode(ConvType::Qa),
            ("normal", None) => Command::Mode(ConvType::Normal),
            ("model", Some(alias)) => {
                Command::Model(ModelId::from_alias(alias))
            }
            ("quit" | "exit", None) => Command::Quit,
            _ => Command::Invalid(line.to_owned()),
        }
    }
}
