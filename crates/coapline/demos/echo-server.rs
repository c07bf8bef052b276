//! Minimal UDP echo server on two routes.
//!
//! Run with:
//!   cargo run --example echo-server
//!
//! In another terminal:
//!   cargo run -- send 127.0.0.1:5683 --method post --path /echo --data hello

use coapline::endpoint::{listen_and_serve, RequestContext, ServeMux};
use coapline::message::{Code, Message};

fn echo(_ctx: &RequestContext<'_>, msg: &Message) -> Option<Message> {
    Some(Message::ack_response(msg, Code::CONTENT).with_payload(msg.payload.clone()))
}

fn hello(_ctx: &RequestContext<'_>, msg: &Message) -> Option<Message> {
    Some(Message::ack_response(msg, Code::CONTENT).with_payload(&b"Reply from CoAP server"[..]))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut mux = ServeMux::new();
    mux.handle_func("udp", "/echo", echo)?;
    mux.handle_func("*", "/hello/", hello)?;

    eprintln!("Listening on udp://127.0.0.1:5683");
    listen_and_serve("udp", "127.0.0.1:5683", mux).await?;
    Ok(())
}
