// Chat transport layer: connection lifecycle, reconnect backoff and attachment uploads.

pub mod backoff;
pub mod session;
pub mod transport;
pub mod upload;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use backoff::Backoff;
pub use session::{
    spawn_session, SessionClosed, SessionCommand, SessionEvent, SessionHandle, SessionOptions,
};
pub use transport::{Connection, Connector, TransportError, WsConnector};
pub use upload::{HttpUploader, UploadBlob, UploadError, UploadedFile, Uploader};
