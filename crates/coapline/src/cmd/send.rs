use std::fs;
use std::time::Duration;

use coapline_endpoint::{Client, ClientConfig, TransmissionParams};
use coapline_message::{Message, MessageType, MAX_TOKEN_LEN};
use coapline_transport::Network;
use tracing::debug;

use crate::cmd::SendArgs;
use crate::exit::{endpoint_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{hex, print_message, OutputFormat};

pub async fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let ack_timeout = parse_duration(&args.ack_timeout)?;
    let token = args.token.as_deref().map(parse_token).transpose()?;
    let payload = resolve_payload(&args)?;
    let config = ClientConfig {
        params: TransmissionParams {
            ack_timeout,
            max_retransmit: args.max_retransmit,
            ..TransmissionParams::default()
        },
        ..ClientConfig::default()
    };

    let network = Network::from(args.network);
    let mut client = Client::dial(network.as_str(), &args.addr)
        .await
        .map_err(|err| endpoint_error("dial failed", err))?
        .with_config(config)
        .map_err(|err| endpoint_error("invalid transmission parameters", err))?;

    let message_type = if args.non {
        MessageType::NonConfirmable
    } else {
        MessageType::Confirmable
    };
    let mut request = client.request(message_type, args.method.into(), &args.path);
    if let Some(token) = token {
        request.token = token.into();
    }
    if let Some(format) = args.content_format {
        request.set_content_format(format);
    }
    request.set_payload(payload);
    log_request(&request, &args.addr);

    let response = client
        .send(&request)
        .await
        .map_err(|err| endpoint_error("send failed", err))?;
    if let Some(response) = &response {
        print_message(response, &args.addr, format);
    }

    if let Err(err) = client.close().await {
        debug!(error = %err, "close failed");
    }
    Ok(SUCCESS)
}

fn log_request(request: &Message, addr: &str) {
    debug!(
        remote = addr,
        kind = request.message_type.short_name(),
        code = %request.code,
        message_id = request.message_id,
        token = %hex(&request.token),
        size = request.payload.len(),
        "sending request"
    );
}

fn resolve_payload(args: &SendArgs) -> CliResult<Vec<u8>> {
    if let Some(data) = &args.data {
        return Ok(data.as_bytes().to_vec());
    }
    if let Some(path) = &args.file {
        return fs::read(path).map_err(|err| {
            crate::exit::io_error(&format!("failed reading {}", path.display()), err)
        });
    }
    Ok(Vec::new())
}

fn parse_token(input: &str) -> CliResult<Vec<u8>> {
    let input = input.trim();
    if input.len() % 2 != 0 {
        return Err(CliError::new(
            USAGE,
            format!("token must have an even number of hex digits: {input}"),
        ));
    }
    let bytes = (0..input.len())
        .step_by(2)
        .map(|i| {
            input
                .get(i..i + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
        })
        .collect::<Option<Vec<u8>>>()
        .ok_or_else(|| CliError::new(USAGE, format!("token is not valid hex: {input}")))?;
    if bytes.len() > MAX_TOKEN_LEN {
        return Err(CliError::new(
            USAGE,
            format!("token is {} bytes, at most {MAX_TOKEN_LEN} allowed", bytes.len()),
        ));
    }
    Ok(bytes)
}

fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}
