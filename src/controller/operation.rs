use crate::error::DispatchError;
use crate::message::{self, Message, MessageType};
use hyper::Method;
use std::collections::HashMap;

pub const MIN_CONSUME_NUM: usize = 1;
pub const MAX_CONSUME_NUM: usize = 100;
pub const MIN_CONSUME_TIMEOUT: u64 = 1_000;
pub const MAX_CONSUME_TIMEOUT: u64 = 60_000;

/// Position of the queue name in `/{ctx}/{servlet}/{queue}` once split on `/`.
const QUEUE_SEGMENT_INDEX: usize = 3;

/// The parts of an HTTP request the dispatcher looks at.
#[derive(Debug, Clone)]
pub struct BridgeRequest {
    pub method: Method,
    pub path: String,
    pub params: HashMap<String, String>,
}

impl BridgeRequest {
    /// Merges query and form parameters. A key present in both keeps the query value.
    pub fn new(method: Method, path: &str, query: Option<&str>, form: Option<&[u8]>) -> Self {
        let mut params = HashMap::new();
        if let Some(query) = query {
            for (k, v) in url::form_urlencoded::parse(query.as_bytes()) {
                params.entry(k.into_owned()).or_insert_with(|| v.into_owned());
            }
        }
        if let Some(form) = form {
            for (k, v) in url::form_urlencoded::parse(form) {
                params.entry(k.into_owned()).or_insert_with(|| v.into_owned());
            }
        }

        BridgeRequest {
            method,
            path: path.to_string(),
            params,
        }
    }

    /// Returns the parameter when present and non-empty.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    fn require(&self, name: &'static str) -> Result<&str, DispatchError> {
        self.param(name).ok_or(DispatchError::MissingParameter(name))
    }
}

pub fn queue_name(path: &str) -> Result<&str, DispatchError> {
    path.split('/')
        .nth(QUEUE_SEGMENT_INDEX)
        .filter(|s| !s.is_empty())
        .ok_or(DispatchError::MissingParameter("queue name"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Produce,
    Consume,
    Request,
    Response,
}

impl Operation {
    /// Exact, case-sensitive match on the `type` parameter.
    pub fn classify(api_type: Option<&str>) -> Result<Operation, DispatchError> {
        match api_type {
            Some("produce") => Ok(Operation::Produce),
            Some("consume") => Ok(Operation::Consume),
            Some("request") => Ok(Operation::Request),
            Some("response") => Ok(Operation::Response),
            Some(other) if !other.is_empty() => Err(DispatchError::UnsupportedOperation(
                format!("unsupported operation type : {other}"),
            )),
            _ => Err(DispatchError::UnsupportedOperation(
                "the query string : type can not be null or empty".to_string(),
            )),
        }
    }

    pub fn method(self) -> Method {
        match self {
            Operation::Consume => Method::GET,
            Operation::Produce | Operation::Request | Operation::Response => Method::POST,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Produce => "produce",
            Operation::Consume => "consume",
            Operation::Request => "request",
            Operation::Response => "response",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeMode {
    Sync,
    Async,
}

impl ConsumeMode {
    /// Unlike `type`, `mode` is matched case-insensitively.
    fn parse(mode: &str) -> Result<ConsumeMode, DispatchError> {
        match mode.to_ascii_lowercase().as_str() {
            "sync" => Ok(ConsumeMode::Sync),
            "async" => Ok(ConsumeMode::Async),
            _ => Err(DispatchError::InvalidParameterRange(format!(
                "mode, it should be sync or async but got {mode}"
            ))),
        }
    }
}

/// A validated, decoded request, ready to hand to the bus.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Produce {
        queue: String,
        messages: Vec<Message>,
    },
    ConsumeSync {
        queue: String,
        num: usize,
    },
    ConsumeAsync {
        queue: String,
    },
    Request {
        queue: String,
        message: Message,
        timeout_ms: u64,
    },
    Respond {
        queue: String,
        message: Message,
    },
}

impl Command {
    /// Checks method, parameters, ranges and payload for `op`, in that order.
    pub fn parse(op: Operation, req: &BridgeRequest) -> Result<Command, DispatchError> {
        if req.method != op.method() {
            return Err(DispatchError::MethodNotAllowed(req.method.to_string()));
        }
        let queue = queue_name(&req.path)?.to_string();

        match op {
            Operation::Produce => {
                let raw = req.require("messages")?;
                let messages = message::decode_many(raw, MessageType::AppMessage)?;
                Ok(Command::Produce { queue, messages })
            }
            Operation::Consume => match ConsumeMode::parse(req.require("mode")?)? {
                ConsumeMode::Sync => {
                    let num = parse_bounded::<usize>(
                        req.require("num")?,
                        "num",
                        MIN_CONSUME_NUM,
                        MAX_CONSUME_NUM,
                    )?;
                    Ok(Command::ConsumeSync { queue, num })
                }
                ConsumeMode::Async => Ok(Command::ConsumeAsync { queue }),
            },
            Operation::Request => {
                let raw = req.require("message")?;
                let timeout_ms = parse_bounded::<u64>(
                    req.require("timeout")?,
                    "timeout",
                    MIN_CONSUME_TIMEOUT,
                    MAX_CONSUME_TIMEOUT,
                )?;
                let message = message::decode(raw, MessageType::AppMessage)?;
                Ok(Command::Request {
                    queue,
                    message,
                    timeout_ms,
                })
            }
            Operation::Response => {
                let raw = req.require("message")?;
                let message = message::decode(raw, MessageType::AppMessage)?;
                Ok(Command::Respond { queue, message })
            }
        }
    }
}

fn parse_bounded<T>(raw: &str, name: &str, min: T, max: T) -> Result<T, DispatchError>
where
    T: std::str::FromStr + PartialOrd + std::fmt::Display + Copy,
{
    let value: T = raw.trim().parse().map_err(|_| {
        DispatchError::InvalidParameterRange(format!("{name}, it must be an integer"))
    })?;
    if value < min || value > max {
        return Err(DispatchError::InvalidParameterRange(format!(
            "{name} = {value}, it should be between {min} and {max}"
        )));
    }
    Ok(value)
}
