//! Channel expectation helpers shared by the tests in this workspace.

use std::fmt::Debug;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::oneshot::Receiver;
use tokio::time::timeout;

/// Waits briefly for a message on the channel and panics if none arrives.
pub async fn expect_mpsc_response<T>(receiver: &mut UnboundedReceiver<T>) -> T {
    match timeout(Duration::from_millis(10), receiver.recv()).await {
        Ok(Some(response)) => response,
        Ok(None) => panic!("Channel unexpectedly closed"),
        Err(_) => panic!("No response received within timeout period"),
    }
}

/// Asserts that no message arrives on the channel within the timeout.
pub async fn expect_mpsc_timeout<T>(receiver: &mut UnboundedReceiver<T>)
where
    T: Debug,
{
    match timeout(Duration::from_millis(10), receiver.recv()).await {
        Ok(Some(response)) => panic!("Expected timeout, instead received {:?}", response),
        Ok(None) => panic!("Channel unexpectedly closed"),
        Err(_) => (),
    }
}

/// Waits briefly for a oneshot to resolve and panics if it does not.
pub async fn expect_oneshot_response<T>(receiver: Receiver<T>) -> T {
    match timeout(Duration::from_millis(10), receiver).await {
        Ok(Ok(response)) => response,
        Ok(Err(_)) => panic!("Channel unexpectedly closed"),
        Err(_) => panic!("No response received within timeout period"),
    }
}
