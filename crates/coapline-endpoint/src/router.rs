use std::sync::Arc;

use coapline_message::{Code, Message};
use coapline_transport::Network;
use tracing::debug;

use crate::error::{Error, Result};
use crate::handler::{func_handler, Handler, RequestContext};

struct Route {
    network: Option<Network>,
    pattern: String,
    handler: Arc<dyn Handler>,
}

/// Dispatches requests to handlers by URI path and transport.
///
/// Patterns ending in `/` match a whole subtree; other patterns match only
/// the identical path. Among matching routes the longest pattern wins, and
/// equal lengths go to the route registered first. Unmatched confirmable
/// requests get a piggy-backed 4.04; anything else unmatched gets no reply.
#[derive(Default)]
pub struct ServeMux {
    routes: Vec<Route>,
}

impl ServeMux {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `pattern` on the transport named by `network`.
    ///
    /// `network` is `"udp"`, `"tcp"`, or `""`/`"*"` for any transport. A
    /// single leading `/` on the pattern is ignored.
    pub fn handle<H>(&mut self, network: &str, pattern: &str, handler: H) -> Result<()>
    where
        H: Handler + 'static,
    {
        let network = parse_label(network)?;
        let pattern = pattern.strip_prefix('/').unwrap_or(pattern);
        if pattern.is_empty() {
            return Err(Error::Configuration("empty route pattern".into()));
        }
        if self
            .routes
            .iter()
            .any(|route| route.network == network && route.pattern == pattern)
        {
            return Err(Error::Configuration(format!(
                "multiple registrations for {pattern:?} on transport {}",
                label_name(network)
            )));
        }
        debug!(pattern, network = label_name(network), "route registered");
        self.routes.push(Route {
            network,
            pattern: pattern.to_string(),
            handler: Arc::new(handler),
        });
        Ok(())
    }

    /// Register a closure; see [`ServeMux::handle`].
    pub fn handle_func<F>(&mut self, network: &str, pattern: &str, f: F) -> Result<()>
    where
        F: Fn(&RequestContext<'_>, &Message) -> Option<Message> + Send + Sync + 'static,
    {
        self.handle(network, pattern, func_handler(f))
    }

    /// The pattern that would serve `path` on `network`, if any.
    pub fn match_route(&self, path: &str, network: Network) -> Option<&str> {
        self.find(path, network).map(|route| route.pattern.as_str())
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    fn find(&self, path: &str, network: Network) -> Option<&Route> {
        let path = path.strip_prefix('/').unwrap_or(path);
        let mut best: Option<&Route> = None;
        for route in &self.routes {
            if route.network.is_some_and(|n| n != network) || !path_match(&route.pattern, path) {
                continue;
            }
            // Strictly longer only, so the earliest registration keeps ties.
            if best.map_or(true, |b| route.pattern.len() > b.pattern.len()) {
                best = Some(route);
            }
        }
        best
    }
}

impl Handler for ServeMux {
    fn serve(&self, ctx: &RequestContext<'_>, msg: &Message) -> Option<Message> {
        let path = msg.path_string();
        match self.find(&path, ctx.network()) {
            Some(route) => route.handler.serve(ctx, msg),
            None => {
                debug!(
                    path = %path,
                    remote = %ctx.remote(),
                    message_id = msg.message_id,
                    "no route"
                );
                not_found(msg)
            }
        }
    }
}

/// Reports whether `path` matches `pattern`.
pub fn path_match(pattern: &str, path: &str) -> bool {
    if pattern.is_empty() {
        return false;
    }
    if pattern.ends_with('/') {
        path.starts_with(pattern)
    } else {
        pattern == path
    }
}

/// The reply for an unrouted request: 4.04 for a confirmable, else nothing.
pub fn not_found(msg: &Message) -> Option<Message> {
    msg.is_confirmable()
        .then(|| Message::ack_response(msg, Code::NOT_FOUND))
}

fn parse_label(label: &str) -> Result<Option<Network>> {
    match label {
        "" | "*" => Ok(None),
        other => other
            .parse::<Network>()
            .map(Some)
            .map_err(|_| Error::Configuration(format!("unknown transport {other:?}"))),
    }
}

fn label_name(network: Option<Network>) -> &'static str {
    network.map_or("*", Network::as_str)
}
