//! Helpers for the actor loops in this workspace.

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

/// Pumps messages from an unbounded channel into an actor's internal
/// channel.  Each received message is translated through `received_message`;
/// when the watched channel closes, `closed_message` is sent once and the
/// pump stops.  The pump also stops if the actor itself goes away.
pub fn notify_on_unbounded_recv<RecvMessage, ActorMessage>(
    mut receiver: UnboundedReceiver<RecvMessage>,
    actor_channel: UnboundedSender<ActorMessage>,
    received_message: impl Fn(RecvMessage) -> ActorMessage + Send + 'static,
    closed_message: impl FnOnce() -> ActorMessage + Send + 'static,
) where
    RecvMessage: Send + 'static,
    ActorMessage: Send + 'static,
{
    tokio::spawn(async move {
        loop {
            tokio::select! {
                received = receiver.recv() => {
                    match received {
                        Some(message) => {
                            let _ = actor_channel.send(received_message(message));
                        }

                        None => {
                            let _ = actor_channel.send(closed_message());
                            break;
                        }
                    }
                }

                _ = actor_channel.closed() => {
                    break;
                }
            }
        }
    });
}
