//! Socket pumps for one connection.

use crate::framing::{encode_frame, read_frame};
use crate::message::Message;
use crate::remote_node::RemoteCommand;
use crate::NetworkError;
use appchain_io::MailboxSender;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::trace;

/// Splits `stream` into a reader task feeding `inbox` and a writer task
/// draining the returned channel.
///
/// The reader reports the first read or decode failure as a `Disconnect`.
/// The writer stops when the channel closes or a write fails.
pub fn spawn<S>(stream: S, magic: u32, inbox: MailboxSender<RemoteCommand>) -> mpsc::UnboundedSender<Message>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    tokio::spawn(async move {
        loop {
            match read_frame(&mut reader, magic).await {
                Ok(message) => {
                    trace!(command = message.command(), "frame received");
                    if inbox.send(RemoteCommand::Inbound(message)).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    let reason = match e {
                        NetworkError::Connection(e)
                            if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                        {
                            "remote closed the connection".to_string()
                        }
                        other => other.to_string(),
                    };
                    let _ = inbox.send(RemoteCommand::Disconnect(reason));
                    break;
                }
            }
        }
    });

    tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let frame = encode_frame(magic, &message);
            if writer.write_all(&frame).await.is_err() {
                break;
            }
        }
        let _ = writer.shutdown().await;
    });

    outbound
}
