//! Structured actions and the command grammar the model speaks.
//!
//! The model replies with a single call expression:
//!
//! ```text
//! do(action="Tap", element=[500,320])
//! do(action="Type", text="hello")
//! finish(message="done")
//! ```
//!
//! [`parse_action`] turns that text into a [`StructuredAction`]. Action names
//! form a closed set; anything else becomes [`Action::Unrecognized`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ActionError;

/// A screen coordinate in the model's normalized 0..=999 space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: i64,
    pub y: i64,
}

impl std::fmt::Display for Point {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Device-level operations the model may request via `do(...)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum Action {
    Launch {
        app: String,
    },
    Tap {
        element: Option<Point>,
        /// Present when the tap is a sensitive operation needing confirmation.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    #[serde(rename = "Double Tap")]
    DoubleTap {
        element: Option<Point>,
    },
    #[serde(rename = "Long Press")]
    LongPress {
        element: Option<Point>,
    },
    Swipe {
        start: Option<Point>,
        end: Option<Point>,
    },
    Type {
        text: String,
    },
    #[serde(rename = "Type_Name")]
    TypeName {
        text: String,
    },
    Interact,
    Note {
        message: String,
    },
    #[serde(rename = "Call_API")]
    CallApi {
        instruction: String,
    },
    #[serde(rename = "Take_over")]
    TakeOver {
        message: String,
    },
    Back,
    Home,
    Wait {
        duration: String,
    },
    Unrecognized {
        name: String,
    },
}

impl Action {
    /// The action name exactly as it appears in the command grammar.
    pub fn name(&self) -> &str {
        match self {
            Self::Launch { .. } => "Launch",
            Self::Tap { .. } => "Tap",
            Self::DoubleTap { .. } => "Double Tap",
            Self::LongPress { .. } => "Long Press",
            Self::Swipe { .. } => "Swipe",
            Self::Type { .. } => "Type",
            Self::TypeName { .. } => "Type_Name",
            Self::Interact => "Interact",
            Self::Note { .. } => "Note",
            Self::CallApi { .. } => "Call_API",
            Self::TakeOver { .. } => "Take_over",
            Self::Back => "Back",
            Self::Home => "Home",
            Self::Wait { .. } => "Wait",
            Self::Unrecognized { name } => name,
        }
    }
}

/// A decoded model command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StructuredAction {
    /// Perform a device action and keep going.
    Do(Action),
    /// End the task with a message for the user.
    Finish { message: String },
}

impl StructuredAction {
    /// Build a `finish` command.
    pub fn finish(message: impl Into<String>) -> Self {
        Self::Finish {
            message: message.into(),
        }
    }

    pub fn is_finish(&self) -> bool {
        matches!(self, Self::Finish { .. })
    }

    /// `"finish"` for finish commands, the action name otherwise.
    pub fn kind_name(&self) -> &str {
        match self {
            Self::Finish { .. } => "finish",
            Self::Do(action) => action.name(),
        }
    }

    /// The user-facing message carried by the command, if any.
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Finish { message } => Some(message),
            Self::Do(Action::Tap { message, .. }) => message.as_deref(),
            Self::Do(Action::Note { message }) | Self::Do(Action::TakeOver { message }) => {
                Some(message)
            }
            Self::Do(_) => None,
        }
    }
}

/// Turns raw action text into a [`StructuredAction`].
pub trait ActionDecoder: Send + Sync {
    fn decode(&self, text: &str) -> Result<StructuredAction, ActionError>;
}

/// Decoder for the `do(...)` / `finish(...)` grammar.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandDecoder;

impl ActionDecoder for CommandDecoder {
    fn decode(&self, text: &str) -> Result<StructuredAction, ActionError> {
        parse_action(text)
    }
}

const FINISH_PREFIX: &str = "finish(message=";

/// Parse a single command expression.
pub fn parse_action(text: &str) -> Result<StructuredAction, ActionError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ActionError::Empty);
    }

    if text.starts_with("do(") {
        let mut args = ArgParser::new(text, "do".len()).call()?;
        let name = match args.remove("action") {
            Some(value) => value.into_text(),
            None => return Err(ActionError::MissingParameter("action".into())),
        };
        return Ok(StructuredAction::Do(build_action(&name, &args)));
    }

    if text.starts_with("finish(") {
        let strict = ArgParser::new(text, "finish".len())
            .call()
            .ok()
            .and_then(|mut args| args.remove("message"))
            .map(ArgValue::into_text);
        return match strict {
            Some(message) => Ok(StructuredAction::finish(message)),
            None => lenient_finish(text),
        };
    }

    Err(ActionError::UnknownCommand(text.chars().take(40).collect()))
}

/// Accept `finish(message=...)` even when the message has unescaped quotes.
fn lenient_finish(text: &str) -> Result<StructuredAction, ActionError> {
    let Some(rest) = text.strip_prefix(FINISH_PREFIX) else {
        return Err(ActionError::MissingParameter("message".into()));
    };
    tracing::debug!("Strict finish parse failed, falling back to lenient form");
    let rest = rest.trim_end();
    let rest = rest.strip_suffix(')').unwrap_or(rest).trim();
    let message = ['"', '\'']
        .iter()
        .find_map(|q| rest.strip_prefix(*q).and_then(|r| r.strip_suffix(*q)))
        .unwrap_or(rest);
    Ok(StructuredAction::finish(message))
}

fn build_action(name: &str, args: &BTreeMap<String, ArgValue>) -> Action {
    let text = |key: &str| args.get(key).map(ArgValue::to_text).unwrap_or_default();
    let point = |key: &str| args.get(key).and_then(ArgValue::as_point);

    match name {
        "Launch" => Action::Launch { app: text("app") },
        "Tap" => Action::Tap {
            element: point("element"),
            message: args.get("message").map(ArgValue::to_text),
        },
        "Double Tap" => Action::DoubleTap {
            element: point("element"),
        },
        "Long Press" => Action::LongPress {
            element: point("element"),
        },
        "Swipe" => Action::Swipe {
            start: point("start"),
            end: point("end"),
        },
        "Type" => Action::Type { text: text("text") },
        "Type_Name" => Action::TypeName { text: text("text") },
        "Interact" => Action::Interact,
        "Note" => Action::Note {
            message: text("message"),
        },
        "Call_API" => Action::CallApi {
            instruction: text("instruction"),
        },
        "Take_over" => Action::TakeOver {
            message: text("message"),
        },
        "Back" => Action::Back,
        "Home" => Action::Home,
        "Wait" => Action::Wait {
            duration: text("duration"),
        },
        other => Action::Unrecognized {
            name: other.to_string(),
        },
    }
}

/// A keyword-argument value.
#[derive(Debug, Clone, PartialEq)]
enum ArgValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Ident(String),
    List(Vec<ArgValue>),
}

impl ArgValue {
    fn to_text(&self) -> String {
        match self {
            Self::Str(s) | Self::Ident(s) => s.clone(),
            Self::Int(n) => n.to_string(),
            Self::Float(n) => n.to_string(),
            Self::Bool(true) => "True".to_string(),
            Self::Bool(false) => "False".to_string(),
            Self::List(items) => {
                let inner: Vec<String> = items.iter().map(Self::to_text).collect();
                format!("[{}]", inner.join(","))
            }
        }
    }

    fn into_text(self) -> String {
        match self {
            Self::Str(s) | Self::Ident(s) => s,
            other => other.to_text(),
        }
    }

    fn as_number(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            Self::Float(n) if n.is_finite() => Some(n.round() as i64),
            _ => None,
        }
    }

    fn as_point(&self) -> Option<Point> {
        match self {
            Self::List(items) if items.len() >= 2 => Some(Point {
                x: items[0].as_number()?,
                y: items[1].as_number()?,
            }),
            _ => None,
        }
    }
}

/// Recursive-descent parser for `name(key=value, ...)`.
struct ArgParser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> ArgParser<'a> {
    /// `pos` points just past the callee name.
    fn new(src: &'a str, pos: usize) -> Self {
        Self { src, pos }
    }

    fn call(mut self) -> Result<BTreeMap<String, ArgValue>, ActionError> {
        self.expect('(')?;
        let mut args = BTreeMap::new();

        loop {
            self.skip_ws();
            if self.peek() == Some(')') {
                self.bump();
                break;
            }

            let key = self.ident()?;
            self.skip_ws();
            self.expect('=')?;
            self.skip_ws();
            let value = self.value()?;
            args.insert(key, value);

            self.skip_ws();
            match self.bump() {
                Some(',') => continue,
                Some(')') => break,
                Some(c) => return Err(self.error(format!("unexpected `{c}` after argument"))),
                None => return Err(self.error("unterminated argument list")),
            }
        }

        self.skip_ws();
        if self.pos < self.src.len() {
            return Err(self.error("trailing text after call"));
        }
        Ok(args)
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn error(&self, reason: impl Into<String>) -> ActionError {
        ActionError::Malformed {
            position: self.pos,
            reason: reason.into(),
        }
    }

    fn expect(&mut self, want: char) -> Result<(), ActionError> {
        match self.bump() {
            Some(c) if c == want => Ok(()),
            Some(c) => Err(self.error(format!("expected `{want}`, found `{c}`"))),
            None => Err(self.error(format!("expected `{want}`, found end of input"))),
        }
    }

    fn ident(&mut self) -> Result<String, ActionError> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            self.bump();
        }
        if start == self.pos {
            return Err(self.error("expected identifier"));
        }
        Ok(self.src[start..self.pos].to_string())
    }

    fn value(&mut self) -> Result<ArgValue, ActionError> {
        match self.peek() {
            Some(q @ ('"' | '\'')) => {
                self.bump();
                self.string(q).map(ArgValue::Str)
            }
            Some('[') => {
                self.bump();
                self.list()
            }
            Some(c) if c == '-' || c.is_ascii_digit() => self.number(),
            Some(c) if c.is_alphabetic() || c == '_' => {
                let ident = self.ident()?;
                Ok(match ident.as_str() {
                    "True" | "true" => ArgValue::Bool(true),
                    "False" | "false" => ArgValue::Bool(false),
                    _ => ArgValue::Ident(ident),
                })
            }
            Some(c) => Err(self.error(format!("unexpected `{c}` in value"))),
            None => Err(self.error("missing value")),
        }
    }

    fn string(&mut self, quote: char) -> Result<String, ActionError> {
        let mut out = String::new();
        loop {
            match self.bump() {
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('r') => out.push('\r'),
                    Some(c) => out.push(c),
                    None => return Err(self.error("dangling escape")),
                },
                Some(c) if c == quote => return Ok(out),
                Some(c) => out.push(c),
                None => return Err(self.error("unterminated string")),
            }
        }
    }

    fn number(&mut self) -> Result<ArgValue, ActionError> {
        let start = self.pos;
        if self.peek() == Some('-') {
            self.bump();
        }
        while self.peek().is_some_and(|c| c.is_ascii_digit() || c == '.') {
            self.bump();
        }
        let raw = &self.src[start..self.pos];
        if let Ok(n) = raw.parse::<i64>() {
            return Ok(ArgValue::Int(n));
        }
        raw.parse::<f64>()
            .map(ArgValue::Float)
            .map_err(|_| self.error(format!("invalid number `{raw}`")))
    }

    fn list(&mut self) -> Result<ArgValue, ActionError> {
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            if self.peek() == Some(']') {
                self.bump();
                return Ok(ArgValue::List(items));
            }
            items.push(self.value()?);
            self.skip_ws();
            match self.bump() {
                Some(',') => continue,
                Some(']') => return Ok(ArgValue::List(items)),
                Some(c) => return Err(self.error(format!("unexpected `{c}` in list"))),
                None => return Err(self.error("unterminated list")),
            }
        }
    }
}
