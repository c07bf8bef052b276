use std::sync::Arc;

use coapline_message::Message;
use coapline_transport::{Addr, Conn, Network};

/// What a handler knows about the request beyond the message itself.
#[derive(Debug, Clone, Copy)]
pub struct RequestContext<'a> {
    network: Network,
    remote: Addr,
    conn: Option<&'a Conn>,
}

impl<'a> RequestContext<'a> {
    /// Context for a request received on `conn` from `remote`.
    pub fn new(conn: &'a Conn, remote: Addr) -> Self {
        Self {
            network: conn.network(),
            remote,
            conn: Some(conn),
        }
    }

    /// Context without a live handle, for dispatching a message that did not
    /// arrive through a server loop.
    pub fn detached(remote: Addr) -> Self {
        Self {
            network: remote.network(),
            remote,
            conn: None,
        }
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn remote(&self) -> Addr {
        self.remote
    }

    /// Handle the request arrived on, if any. Handlers use it to send
    /// separate responses or notifications.
    pub fn conn(&self) -> Option<&'a Conn> {
        self.conn
    }
}

/// Serves one request.
///
/// Returning `Some` sends that message back to the requester; `None` sends
/// nothing.
pub trait Handler: Send + Sync {
    fn serve(&self, ctx: &RequestContext<'_>, msg: &Message) -> Option<Message>;
}

impl<H: Handler + ?Sized> Handler for Arc<H> {
    fn serve(&self, ctx: &RequestContext<'_>, msg: &Message) -> Option<Message> {
        (**self).serve(ctx, msg)
    }
}

impl<H: Handler + ?Sized> Handler for Box<H> {
    fn serve(&self, ctx: &RequestContext<'_>, msg: &Message) -> Option<Message> {
        (**self).serve(ctx, msg)
    }
}

/// Adapts a closure into a [`Handler`].
pub struct FuncHandler<F>(F);

impl<F> Handler for FuncHandler<F>
where
    F: Fn(&RequestContext<'_>, &Message) -> Option<Message> + Send + Sync,
{
    fn serve(&self, ctx: &RequestContext<'_>, msg: &Message) -> Option<Message> {
        (self.0)(ctx, msg)
    }
}

pub fn func_handler<F>(f: F) -> FuncHandler<F>
where
    F: Fn(&RequestContext<'_>, &Message) -> Option<Message> + Send + Sync,
{
    FuncHandler(f)
}
