//! Consensus messages.
//!
//! `type(1) view_number(2) body`, carried as the data of a
//! `ConsensusPayload`. Decoding rejects unknown tags and trailing bytes.

mod change_view;
mod prepare_request;
mod prepare_response;

pub use change_view::ChangeView;
pub use prepare_request::PrepareRequest;
pub use prepare_response::PrepareResponse;

use crate::{ConsensusError, ConsensusMessageType, ConsensusResult};
use appchain_io::{BinaryWriter, MemoryReader};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsensusMessage {
    ChangeView {
        view_number: u16,
        body: ChangeView,
    },
    PrepareRequest {
        view_number: u16,
        body: Box<PrepareRequest>,
    },
    PrepareResponse {
        view_number: u16,
        body: PrepareResponse,
    },
}

impl ConsensusMessage {
    pub fn change_view(view_number: u16, new_view_number: u16) -> ConsensusResult<Self> {
        Ok(Self::ChangeView {
            view_number,
            body: ChangeView::new(new_view_number)?,
        })
    }

    pub fn prepare_request(view_number: u16, body: PrepareRequest) -> Self {
        Self::PrepareRequest {
            view_number,
            body: Box::new(body),
        }
    }

    pub fn prepare_response(view_number: u16, body: PrepareResponse) -> Self {
        Self::PrepareResponse { view_number, body }
    }

    pub fn message_type(&self) -> ConsensusMessageType {
        match self {
            Self::ChangeView { .. } => ConsensusMessageType::ChangeView,
            Self::PrepareRequest { .. } => ConsensusMessageType::PrepareRequest,
            Self::PrepareResponse { .. } => ConsensusMessageType::PrepareResponse,
        }
    }

    /// View the sender was in when it sent the message.
    pub fn view_number(&self) -> u16 {
        match self {
            Self::ChangeView { view_number, .. }
            | Self::PrepareRequest { view_number, .. }
            | Self::PrepareResponse { view_number, .. } => *view_number,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut writer = BinaryWriter::new();
        writer.write_u8(self.message_type().to_byte());
        writer.write_u16(self.view_number());
        match self {
            Self::ChangeView { body, .. } => body.write_body(&mut writer),
            Self::PrepareRequest { body, .. } => body.write_body(&mut writer),
            Self::PrepareResponse { body, .. } => body.write_body(&mut writer),
        }
        writer.into_bytes()
    }

    pub fn from_bytes(data: &[u8]) -> ConsensusResult<Self> {
        let mut reader = MemoryReader::new(data);
        let tag = reader.read_u8()?;
        let message_type =
            ConsensusMessageType::from_byte(tag).ok_or(ConsensusError::UnknownMessageType(tag))?;
        let view_number = reader.read_u16()?;
        let message = match message_type {
            ConsensusMessageType::ChangeView => Self::ChangeView {
                view_number,
                body: ChangeView::read_body(&mut reader)?,
            },
            ConsensusMessageType::PrepareRequest => Self::PrepareRequest {
                view_number,
                body: Box::new(PrepareRequest::read_body(&mut reader)?),
            },
            ConsensusMessageType::PrepareResponse => Self::PrepareResponse {
                view_number,
                body: PrepareResponse::read_body(&mut reader)?,
            },
        };
        reader.ensure_end()?;
        Ok(message)
    }
}
