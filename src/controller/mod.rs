use crate::bus::Messagebus;
use crate::error::DispatchError;
use crate::message;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Body, Request, Response, StatusCode};
use std::convert::Infallible;
use std::sync::Arc;

pub mod dto;
pub mod operation;

use dto::{ResponseEnvelope, EMPTY_PAYLOAD};
use operation::{BridgeRequest, Command, Operation};

// 1_048_576 bytes = 1MB
const MAX_BODY_BYTES: usize = 1_048_576;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Turns bridged HTTP requests into bus calls. Holds nothing but the bus handle,
/// so one instance serves every connection.
#[derive(Clone)]
pub struct Dispatcher {
    bus: Arc<dyn Messagebus>,
}

impl Dispatcher {
    pub fn new(bus: Arc<dyn Messagebus>) -> Self {
        Dispatcher { bus }
    }

    pub async fn handle(&self, req: Request<Body>) -> Result<Response<Body>, Infallible> {
        log::info!("[service] url is : {}", req.uri());

        let (parts, body) = req.into_parts();
        let full_body = match hyper::body::to_bytes(body).await {
            Ok(b) => b,
            Err(e) => {
                log::error!("Error reading request body: {e}");
                return Ok(write(ResponseEnvelope::failure(
                    &DispatchError::MalformedMessage(format!("error reading request body: {e}")),
                )));
            }
        };

        if full_body.len() > MAX_BODY_BYTES {
            log::error!("Error: body exceeds 1MB limit");
            return Ok(write(ResponseEnvelope::failure(
                &DispatchError::MalformedMessage("body exceeds 1MB limit".to_string()),
            )));
        }

        let is_form = parts
            .headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map_or(false, |v| v.starts_with(FORM_CONTENT_TYPE));
        let form = if is_form { Some(&full_body[..]) } else { None };

        let bridge_req = BridgeRequest::new(parts.method, parts.uri.path(), parts.uri.query(), form);
        Ok(write(self.dispatch(&bridge_req).await))
    }

    pub async fn dispatch(&self, req: &BridgeRequest) -> ResponseEnvelope {
        let op = match Operation::classify(req.param("type")) {
            Ok(op) => op,
            Err(e) => {
                log::error!("{e}");
                return ResponseEnvelope::failure(&e);
            }
        };

        let outcome = match Command::parse(op, req) {
            Ok(cmd) => self.invoke(cmd).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(data) => ResponseEnvelope::success(data),
            Err(e) => {
                log::error!("[{}] {e}", op.as_str());
                ResponseEnvelope::failure(&e)
            }
        }
    }

    /// Makes exactly one bus call and encodes its result as the envelope payload.
    async fn invoke(&self, cmd: Command) -> Result<String, DispatchError> {
        match cmd {
            Command::Produce { queue, messages } => {
                log::debug!("producing {} messages to {queue}", messages.len());
                self.bus
                    .producer()?
                    .batch_produce(&messages, &queue)
                    .await?;
                Ok(EMPTY_PAYLOAD.to_string())
            }
            Command::ConsumeSync { queue, num } => {
                log::debug!("consuming up to {num} messages from {queue}");
                let messages = self.bus.consumer()?.consume(&queue, num).await?;
                Ok(message::encode_many(&messages))
            }
            Command::ConsumeAsync { queue } => {
                log::debug!("async consume requested on {queue}");
                Err(DispatchError::NotImplemented("async consume"))
            }
            Command::Request {
                queue,
                message,
                timeout_ms,
            } => {
                log::debug!("requesting on {queue} with a {timeout_ms}ms timeout");
                let reply = self
                    .bus
                    .requester()?
                    .request(message, &queue, timeout_ms)
                    .await?;
                Ok(message::encode(&reply))
            }
            Command::Respond { queue, message } => {
                log::debug!("responding on {queue}");
                self.bus
                    .responser()?
                    .response_tmp_message(message, &queue)
                    .await?;
                Ok(EMPTY_PAYLOAD.to_string())
            }
        }
    }
}

fn write(envelope: ResponseEnvelope) -> Response<Body> {
    let status = StatusCode::from_u16(envelope.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = match serde_json::to_string(&envelope) {
        Ok(v) => v,
        Err(e) => {
            log::error!("Error encoding response as json: {e}");
            String::new()
        }
    };

    let mut resp = Response::new(Body::from(body));
    *resp.status_mut() = status;
    resp.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    resp
}
