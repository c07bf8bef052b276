use coapline_endpoint::{func_handler, RequestContext, ServeMux, Server};
use coapline_message::{Code, Message, MessageType};
use coapline_transport::Network;
use tracing::info;

use crate::cmd::ServeArgs;
use crate::exit::{endpoint_error, io_error, CliResult, SUCCESS};
use crate::output::OutputFormat;

pub async fn run(args: ServeArgs, _format: OutputFormat) -> CliResult<i32> {
    let network = Network::from(args.network);
    let server = build_server(&args.routes, network)?;

    tokio::select! {
        result = server.listen_and_serve(network, &args.addr) => {
            result.map_err(|err| endpoint_error("serve failed", err))?;
        }
        signal = tokio::signal::ctrl_c() => {
            signal.map_err(|err| io_error("signal handler setup failed", err))?;
            info!("interrupted, shutting down");
        }
    }

    Ok(SUCCESS)
}

fn build_server(routes: &[String], network: Network) -> CliResult<Server> {
    if routes.is_empty() {
        return Ok(Server::new(func_handler(echo)));
    }
    let mut mux = ServeMux::new();
    for route in routes {
        mux.handle_func(network.as_str(), route, echo)
            .map_err(|err| endpoint_error("invalid route", err))?;
    }
    Ok(Server::new(mux))
}

/// Reply 2.05 Content carrying the request payload and content format.
fn echo(ctx: &RequestContext<'_>, msg: &Message) -> Option<Message> {
    if !msg.code.is_request() {
        return None;
    }
    info!(
        remote = %ctx.remote(),
        code = %msg.code,
        path = %msg.path_string(),
        size = msg.payload.len(),
        "echoing request"
    );
    let message_type = if msg.is_confirmable() {
        MessageType::Acknowledgement
    } else {
        MessageType::NonConfirmable
    };
    let mut response = Message::new(message_type, Code::CONTENT, msg.message_id)
        .with_token(msg.token.clone())
        .with_payload(msg.payload.clone());
    if let Some(format) = msg.content_format() {
        response.set_content_format(format);
    }
    Some(response)
}
