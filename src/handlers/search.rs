//! `SEARCH`/`UID SEARCH`, typed over the identifier namespace the
//! caller asked for so a sequence-number search result can never be
//! mistaken for a UID search result.

use super::{resolve, CommandHandler};
use crate::codec::response::{MailboxData, Response, Untagged};
use crate::error::Error;
use crate::ident::{IdSet, Namespace};
use crate::pipeline::Stage;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::oneshot;

pub fn search<N>(tag: impl Into<String>) -> (Arc<dyn Stage>, oneshot::Receiver<crate::error::Result<IdSet<N>>>)
where
    N: Namespace + Send + Sync + 'static,
{
    let (tx, rx) = oneshot::channel();
    let _marker: PhantomData<N> = PhantomData;
    let stage = CommandHandler::new(
        tag,
        Vec::<u32>::new(),
        |state: &mut Vec<u32>, response: &Response| {
            if let Response::Untagged(Untagged::Mailbox(MailboxData::Search(ids))) = response {
                state.extend(ids.iter().copied());
            }
        },
        |state, outcome| {
            let mut set: IdSet<N> = IdSet::new();
            for value in state {
                if value != 0 {
                    set.insert_range(value, value);
                }
            }
            resolve(&outcome, set, Error::CommandFailed)
        },
        tx,
    );
    (stage, rx)
}
