// GTPv2-C fixed header and message-type table.
//
// Field layout follows 3GPP TS 29.274 §5.1: flags (version/P/T), message
// type, length, conditional TEID, 24-bit sequence number, spare octet.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::error::{GtpError, GtpResult};

/// Header length with TEID present.
pub const GTPC_HEADER_LEN: usize = 12;

/// Header length without TEID.
pub const GTPC_HEADER_LEN_NO_TEID: usize = 8;

/// Sequence numbers are 24 bits wide.
pub const GTPC_SEQ_MASK: u32 = 0x00FF_FFFF;

/// GTPv2-C message types handled by the simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum GtpMsgType {
    EchoRequest = 1,
    EchoResponse = 2,
    CreateSessionRequest = 32,
    CreateSessionResponse = 33,
    ModifyBearerRequest = 34,
    ModifyBearerResponse = 35,
    DeleteSessionRequest = 36,
    DeleteSessionResponse = 37,
    ChangeNotificationRequest = 38,
    ChangeNotificationResponse = 39,
    ModifyBearerCommand = 64,
    ModifyBearerFailureIndication = 65,
    DeleteBearerCommand = 66,
    DeleteBearerFailureIndication = 67,
    BearerResourceCommand = 68,
    BearerResourceFailureIndication = 69,
    CreateBearerRequest = 95,
    CreateBearerResponse = 96,
    UpdateBearerRequest = 97,
    UpdateBearerResponse = 98,
    DeleteBearerRequest = 99,
    DeleteBearerResponse = 100,
    ReleaseAccessBearersRequest = 170,
    ReleaseAccessBearersResponse = 171,
    DownlinkDataNotification = 176,
    DownlinkDataNotificationAcknowledge = 177,
}

impl TryFrom<u8> for GtpMsgType {
    type Error = GtpError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::EchoRequest),
            2 => Ok(Self::EchoResponse),
            32 => Ok(Self::CreateSessionRequest),
            33 => Ok(Self::CreateSessionResponse),
            34 => Ok(Self::ModifyBearerRequest),
            35 => Ok(Self::ModifyBearerResponse),
            36 => Ok(Self::DeleteSessionRequest),
            37 => Ok(Self::DeleteSessionResponse),
            38 => Ok(Self::ChangeNotificationRequest),
            39 => Ok(Self::ChangeNotificationResponse),
            64 => Ok(Self::ModifyBearerCommand),
            65 => Ok(Self::ModifyBearerFailureIndication),
            66 => Ok(Self::DeleteBearerCommand),
            67 => Ok(Self::DeleteBearerFailureIndication),
            68 => Ok(Self::BearerResourceCommand),
            69 => Ok(Self::BearerResourceFailureIndication),
            95 => Ok(Self::CreateBearerRequest),
            96 => Ok(Self::CreateBearerResponse),
            97 => Ok(Self::UpdateBearerRequest),
            98 => Ok(Self::UpdateBearerResponse),
            99 => Ok(Self::DeleteBearerRequest),
            100 => Ok(Self::DeleteBearerResponse),
            170 => Ok(Self::ReleaseAccessBearersRequest),
            171 => Ok(Self::ReleaseAccessBearersResponse),
            176 => Ok(Self::DownlinkDataNotification),
            177 => Ok(Self::DownlinkDataNotificationAcknowledge),
            _ => Err(GtpError::InvalidMessageType(value)),
        }
    }
}

impl std::str::FromStr for GtpMsgType {
    type Err = String;

    /// Parse the snake_case names used by scenario files.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "echo_req" => Ok(Self::EchoRequest),
            "echo_rsp" => Ok(Self::EchoResponse),
            "create_session_req" => Ok(Self::CreateSessionRequest),
            "create_session_rsp" => Ok(Self::CreateSessionResponse),
            "modify_bearer_req" => Ok(Self::ModifyBearerRequest),
            "modify_bearer_rsp" => Ok(Self::ModifyBearerResponse),
            "delete_session_req" => Ok(Self::DeleteSessionRequest),
            "delete_session_rsp" => Ok(Self::DeleteSessionResponse),
            "change_notification_req" => Ok(Self::ChangeNotificationRequest),
            "change_notification_rsp" => Ok(Self::ChangeNotificationResponse),
            "modify_bearer_cmd" => Ok(Self::ModifyBearerCommand),
            "modify_bearer_fail_ind" => Ok(Self::ModifyBearerFailureIndication),
            "delete_bearer_cmd" => Ok(Self::DeleteBearerCommand),
            "delete_bearer_fail_ind" => Ok(Self::DeleteBearerFailureIndication),
            "bearer_resource_cmd" => Ok(Self::BearerResourceCommand),
            "bearer_resource_fail_ind" => Ok(Self::BearerResourceFailureIndication),
            "create_bearer_req" => Ok(Self::CreateBearerRequest),
            "create_bearer_rsp" => Ok(Self::CreateBearerResponse),
            "update_bearer_req" => Ok(Self::UpdateBearerRequest),
            "update_bearer_rsp" => Ok(Self::UpdateBearerResponse),
            "delete_bearer_req" => Ok(Self::DeleteBearerRequest),
            "delete_bearer_rsp" => Ok(Self::DeleteBearerResponse),
            "release_access_bearers_req" => Ok(Self::ReleaseAccessBearersRequest),
            "release_access_bearers_rsp" => Ok(Self::ReleaseAccessBearersResponse),
            "downlink_data_notification" => Ok(Self::DownlinkDataNotification),
            "downlink_data_notification_ack" => Ok(Self::DownlinkDataNotificationAcknowledge),
            other => Err(format!("unknown GTP-C message name: {other}")),
        }
    }
}

/// Coarse request/response classification used by the procedure machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgCategory {
    /// Initiates a procedure and expects a triggered message. Commands are
    /// classified here as well.
    Request,
    /// Triggered message that closes a procedure, including failure
    /// indications and acknowledges.
    Response,
}

impl GtpMsgType {
    pub fn category(self) -> MsgCategory {
        use GtpMsgType::*;
        match self {
            EchoRequest
            | CreateSessionRequest
            | ModifyBearerRequest
            | DeleteSessionRequest
            | ChangeNotificationRequest
            | ModifyBearerCommand
            | DeleteBearerCommand
            | BearerResourceCommand
            | CreateBearerRequest
            | UpdateBearerRequest
            | DeleteBearerRequest
            | ReleaseAccessBearersRequest
            | DownlinkDataNotification => MsgCategory::Request,
            EchoResponse
            | CreateSessionResponse
            | ModifyBearerResponse
            | DeleteSessionResponse
            | ChangeNotificationResponse
            | ModifyBearerFailureIndication
            | DeleteBearerFailureIndication
            | BearerResourceFailureIndication
            | CreateBearerResponse
            | UpdateBearerResponse
            | DeleteBearerResponse
            | ReleaseAccessBearersResponse
            | DownlinkDataNotificationAcknowledge => MsgCategory::Response,
        }
    }

    /// True for messages that may legally arrive with TEID 0 and create a
    /// session on the receiving side.
    pub fn is_initial(self) -> bool {
        matches!(self, GtpMsgType::CreateSessionRequest)
    }
}

/// GTPv2-C fixed header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GtpHeader {
    pub version: u8,
    pub piggybacked: bool,
    pub teid_present: bool,
    pub msg_type: u8,
    /// Payload length, excluding the first 4 header octets.
    pub length: u16,
    pub teid: Option<u32>,
    pub seq: u32,
}

impl Default for GtpHeader {
    fn default() -> Self {
        Self {
            version: 2,
            piggybacked: false,
            teid_present: true,
            msg_type: 0,
            length: 0,
            teid: Some(0),
            seq: 0,
        }
    }
}

impl GtpHeader {
    pub fn new(msg_type: u8, teid: u32, seq: u32) -> Self {
        Self {
            msg_type,
            teid: Some(teid),
            seq: seq & GTPC_SEQ_MASK,
            ..Self::default()
        }
    }

    fn flags(&self) -> u8 {
        let mut flags = (self.version & 0x07) << 5;
        if self.piggybacked {
            flags |= 0x10;
        }
        if self.teid_present {
            flags |= 0x08;
        }
        flags
    }

    pub fn header_len(&self) -> usize {
        if self.teid_present {
            GTPC_HEADER_LEN
        } else {
            GTPC_HEADER_LEN_NO_TEID
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.flags());
        buf.put_u8(self.msg_type);
        buf.put_u16(self.length);
        if self.teid_present {
            buf.put_u32(self.teid.unwrap_or(0));
        }
        // 24-bit sequence + spare octet
        buf.put_u32((self.seq & GTPC_SEQ_MASK) << 8);
    }

    pub fn decode(buf: &mut Bytes) -> GtpResult<Self> {
        if buf.remaining() < 4 {
            return Err(GtpError::BufferTooShort { needed: 4, available: buf.remaining() });
        }

        let flags = buf.get_u8();
        let version = (flags >> 5) & 0x07;
        let piggybacked = (flags & 0x10) != 0;
        let teid_present = (flags & 0x08) != 0;
        let msg_type = buf.get_u8();
        let length = buf.get_u16();

        if version != 2 {
            return Err(GtpError::InvalidVersion(version));
        }

        let need = if teid_present { 8 } else { 4 };
        if buf.remaining() < need {
            return Err(GtpError::BufferTooShort { needed: need, available: buf.remaining() });
        }

        let teid = if teid_present { Some(buf.get_u32()) } else { None };
        let seq = buf.get_u32() >> 8;

        Ok(Self { version, piggybacked, teid_present, msg_type, length, teid, seq })
    }

    /// Decode only the fixed header from a raw datagram without consuming
    /// it. This is what the dispatcher uses to route before any session
    /// decodes the full message.
    pub fn peek(datagram: &[u8]) -> GtpResult<Self> {
        let mut bytes = Bytes::copy_from_slice(
            &datagram[..datagram.len().min(GTPC_HEADER_LEN)],
        );
        Self::decode(&mut bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // --- encode/decode ---

    #[test]
    fn header_roundtrip_with_teid() {
        let mut hdr = GtpHeader::new(GtpMsgType::CreateSessionRequest as u8, 0xdead_beef, 0x123456);
        hdr.length = 40;

        let mut buf = BytesMut::new();
        hdr.encode(&mut buf);
        assert_eq!(buf.len(), GTPC_HEADER_LEN);

        let mut bytes = buf.freeze();
        let decoded = GtpHeader::decode(&mut bytes).unwrap();
        assert_eq!(decoded, hdr);
    }

    #[test]
    fn header_roundtrip_without_teid() {
        let hdr = GtpHeader {
            teid_present: false,
            teid: None,
            msg_type: GtpMsgType::EchoRequest as u8,
            seq: 7,
            ..GtpHeader::default()
        };

        let mut buf = BytesMut::new();
        hdr.encode(&mut buf);
        assert_eq!(buf.len(), GTPC_HEADER_LEN_NO_TEID);

        let decoded = GtpHeader::decode(&mut buf.freeze()).unwrap();
        assert!(!decoded.teid_present);
        assert_eq!(decoded.teid, None);
        assert_eq!(decoded.seq, 7);
    }

    #[test]
    fn decode_rejects_version_1() {
        // version 1 in the top 3 bits of the flags octet
        let raw = [0x28u8, 32, 0, 8, 0, 0, 0, 0, 0, 0, 0, 0];
        let err = GtpHeader::decode(&mut Bytes::copy_from_slice(&raw)).unwrap_err();
        assert_eq!(err, GtpError::InvalidVersion(1));
    }

    #[test]
    fn decode_rejects_truncated_header() {
        let raw = [0x48u8, 32, 0];
        let err = GtpHeader::decode(&mut Bytes::copy_from_slice(&raw)).unwrap_err();
        assert!(matches!(err, GtpError::BufferTooShort { .. }));
    }

    #[test]
    fn seq_is_masked_to_24_bits() {
        let hdr = GtpHeader::new(32, 1, 0xFF_123456);
        assert_eq!(hdr.seq, 0x123456);
    }

    #[test]
    fn peek_reads_header_from_larger_datagram() {
        let mut hdr = GtpHeader::new(GtpMsgType::ModifyBearerRequest as u8, 0x42, 99);
        hdr.length = 60;
        let mut buf = BytesMut::new();
        hdr.encode(&mut buf);
        buf.extend_from_slice(&[0u8; 56]); // fake IE payload

        let peeked = GtpHeader::peek(&buf).unwrap();
        assert_eq!(peeked.msg_type, GtpMsgType::ModifyBearerRequest as u8);
        assert_eq!(peeked.teid, Some(0x42));
        assert_eq!(peeked.seq, 99);
    }

    // --- categories ---

    #[test]
    fn request_response_pairs_classify() {
        assert_eq!(GtpMsgType::CreateSessionRequest.category(), MsgCategory::Request);
        assert_eq!(GtpMsgType::CreateSessionResponse.category(), MsgCategory::Response);
        assert_eq!(GtpMsgType::DeleteBearerCommand.category(), MsgCategory::Request);
        assert_eq!(GtpMsgType::DeleteBearerFailureIndication.category(), MsgCategory::Response);
        assert_eq!(GtpMsgType::DownlinkDataNotification.category(), MsgCategory::Request);
        assert_eq!(GtpMsgType::DownlinkDataNotificationAcknowledge.category(), MsgCategory::Response);
    }

    #[test]
    fn only_create_session_request_is_initial() {
        assert!(GtpMsgType::CreateSessionRequest.is_initial());
        assert!(!GtpMsgType::ModifyBearerRequest.is_initial());
        assert!(!GtpMsgType::CreateSessionResponse.is_initial());
    }

    #[test]
    fn scenario_names_parse() {
        let t: GtpMsgType = "create_session_req".parse().unwrap();
        assert_eq!(t, GtpMsgType::CreateSessionRequest);
        let t: GtpMsgType = "delete_bearer_cmd".parse().unwrap();
        assert_eq!(t, GtpMsgType::DeleteBearerCommand);
        assert!("create_session".parse::<GtpMsgType>().is_err());
    }

    #[test]
    fn msg_type_u8_roundtrip() {
        for t in [
            GtpMsgType::EchoRequest,
            GtpMsgType::CreateSessionRequest,
            GtpMsgType::DeleteSessionResponse,
            GtpMsgType::BearerResourceCommand,
            GtpMsgType::DownlinkDataNotificationAcknowledge,
        ] {
            assert_eq!(GtpMsgType::try_from(t as u8).unwrap(), t);
        }
        assert!(GtpMsgType::try_from(250).is_err());
    }
}
