// GTP-C message container.
//
// A `GtpMsg` is a decoded header plus an ordered IE list. Scenario steps
// carry one as an immutable template; before each send the session clones
// it and rewrites only the dynamic fields (header TEID/seq, IMSI, sender
// F-TEID, per-bearer GTP-U F-TEIDs), everything else is emitted verbatim.

use std::net::IpAddr;

use bytes::{Buf, Bytes, BytesMut};

use super::error::{GtpError, GtpResult};
use super::header::{GtpHeader, GtpMsgType};
use super::ie::{BearerContextIe, FteidIe, GtpIe, IE_BEARER_CONTEXT, IE_FTEID, IE_IMSI};
use super::ImsiKey;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GtpMsg {
    pub header: GtpHeader,
    pub ies: Vec<GtpIe>,
}

impl GtpMsg {
    pub fn new(msg_type: GtpMsgType) -> Self {
        Self {
            header: GtpHeader { msg_type: msg_type as u8, ..GtpHeader::default() },
            ies: Vec::new(),
        }
    }

    pub fn msg_type(&self) -> GtpResult<GtpMsgType> {
        GtpMsgType::try_from(self.header.msg_type)
    }

    pub fn seq(&self) -> u32 {
        self.header.seq
    }

    /// Stamp the dynamic header fields: destination TEID, sequence number,
    /// and the presence flags for both.
    pub fn set_header(&mut self, teid: u32, seq: u32) {
        self.header.teid_present = true;
        self.header.teid = Some(teid);
        self.header.seq = seq & super::GTPC_SEQ_MASK;
    }

    pub fn add_ie(&mut self, ie: GtpIe) {
        self.ies.push(ie);
    }

    /// First IE matching type and instance.
    pub fn get_ie(&self, ie_type: u8, instance: u8) -> Option<&GtpIe> {
        self.ies.iter().find(|ie| ie.ie_type == ie_type && ie.instance == instance)
    }

    pub fn get_ies(&self, ie_type: u8, instance: u8) -> impl Iterator<Item = &GtpIe> {
        self.ies.iter().filter(move |ie| ie.ie_type == ie_type && ie.instance == instance)
    }

    /// Replace the first IE of the same type and instance, or append.
    pub fn set_ie(&mut self, ie: GtpIe) {
        match self
            .ies
            .iter_mut()
            .find(|e| e.ie_type == ie.ie_type && e.instance == ie.instance)
        {
            Some(slot) => *slot = ie,
            None => self.ies.push(ie),
        }
    }

    pub fn imsi(&self) -> Option<ImsiKey> {
        self.get_ie(IE_IMSI, 0).and_then(|ie| ImsiKey::from_slice(&ie.value))
    }

    pub fn set_imsi(&mut self, key: &ImsiKey) {
        self.set_ie(GtpIe::imsi(key));
    }

    /// Sender F-TEID for control plane: F-TEID IE, instance 0.
    pub fn sender_fteid(&self) -> GtpResult<Option<FteidIe>> {
        match self.get_ie(IE_FTEID, 0) {
            Some(ie) => Ok(Some(FteidIe::from_value(&ie.value)?)),
            None => Ok(None),
        }
    }

    pub fn set_sender_fteid(&mut self, fteid: &FteidIe) {
        self.set_ie(fteid.to_ie(0));
    }

    /// Parse all Bearer Context IEs of the given instance.
    pub fn bearer_contexts(&self, instance: u8) -> GtpResult<Vec<BearerContextIe>> {
        self.get_ies(IE_BEARER_CONTEXT, instance)
            .map(|ie| BearerContextIe::from_value(&ie.value))
            .collect()
    }

    /// Rewrite the GTP-U F-TEID inside every Bearer Context IE of instance
    /// 0. The callback maps an EBI to the bearer's local user-plane TEID;
    /// a `None` return leaves that context untouched.
    pub fn rewrite_bearer_fteids<F>(
        &mut self,
        interface_type: u8,
        local_ip: IpAddr,
        mut uplane_teid: F,
    ) -> GtpResult<()>
    where
        F: FnMut(u8) -> Option<u32>,
    {
        for ie in self
            .ies
            .iter_mut()
            .filter(|ie| ie.ie_type == IE_BEARER_CONTEXT && ie.instance == 0)
        {
            let mut bc = BearerContextIe::from_value(&ie.value)?;
            if let Some(teid) = uplane_teid(bc.ebi) {
                bc.fteid = Some(FteidIe::new(interface_type, teid, local_ip));
                *ie = bc.to_ie(ie.instance);
            }
        }
        Ok(())
    }

    fn payload_len(&self) -> u16 {
        let mut len = if self.header.teid_present { 8 } else { 4 };
        for ie in &self.ies {
            len += ie.encoded_len();
        }
        len as u16
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.header.header_len() + 256);
        let mut header = self.header.clone();
        header.length = self.payload_len();
        header.encode(&mut buf);
        for ie in &self.ies {
            ie.encode(&mut buf);
        }
        buf.freeze()
    }

    pub fn decode(datagram: &[u8]) -> GtpResult<Self> {
        let mut buf = Bytes::copy_from_slice(datagram);
        let header = GtpHeader::decode(&mut buf)?;

        let hdr_extra = if header.teid_present { 8 } else { 4 };
        let payload_len = (header.length as usize).saturating_sub(hdr_extra);
        if buf.remaining() < payload_len {
            return Err(GtpError::BufferTooShort {
                needed: payload_len,
                available: buf.remaining(),
            });
        }

        let mut ies = Vec::new();
        let mut remaining = payload_len;
        while remaining > 0 && buf.has_remaining() {
            let before = buf.remaining();
            let ie = GtpIe::decode(&mut buf)?;
            remaining = remaining.saturating_sub(before - buf.remaining());
            ies.push(ie);
        }

        Ok(Self { header, ies })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gtp::ie::{FTEID_IF_S11_MME_GTPC, FTEID_IF_S1U_SGW, IE_RECOVERY};
    use std::net::Ipv4Addr;

    fn local_ip() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 1, 1, 1))
    }

    fn cs_req_template() -> GtpMsg {
        let mut msg = GtpMsg::new(GtpMsgType::CreateSessionRequest);
        msg.add_ie(GtpIe::from_slice(IE_RECOVERY, 0, &[3]));
        msg.add_ie(BearerContextIe::new(5, None).to_ie(0));
        msg
    }

    // --- dynamic field rewriting ---

    #[test]
    fn set_header_stamps_teid_and_seq() {
        let mut msg = cs_req_template();
        msg.set_header(0, 42);
        assert_eq!(msg.header.teid, Some(0));
        assert!(msg.header.teid_present);
        assert_eq!(msg.seq(), 42);
    }

    #[test]
    fn set_imsi_overwrites_existing() {
        let mut msg = cs_req_template();
        msg.set_imsi(&ImsiKey::from_imsi(1));
        msg.set_imsi(&ImsiKey::from_imsi(2));
        assert_eq!(msg.get_ies(IE_IMSI, 0).count(), 1);
        assert_eq!(msg.imsi(), Some(ImsiKey::from_imsi(2)));
    }

    #[test]
    fn set_sender_fteid_overwrites_existing() {
        let mut msg = cs_req_template();
        msg.set_sender_fteid(&FteidIe::new(FTEID_IF_S11_MME_GTPC, 100, local_ip()));
        msg.set_sender_fteid(&FteidIe::new(FTEID_IF_S11_MME_GTPC, 200, local_ip()));
        let fteid = msg.sender_fteid().unwrap().unwrap();
        assert_eq!(fteid.teid, 200);
    }

    #[test]
    fn rewrite_bearer_fteids_sets_uplane_teid() {
        let mut msg = cs_req_template();
        msg.rewrite_bearer_fteids(FTEID_IF_S1U_SGW, local_ip(), |ebi| {
            assert_eq!(ebi, 5);
            Some(0xBEEF)
        })
        .unwrap();

        let contexts = msg.bearer_contexts(0).unwrap();
        assert_eq!(contexts.len(), 1);
        let fteid = contexts[0].fteid.as_ref().unwrap();
        assert_eq!(fteid.teid, 0xBEEF);
        assert_eq!(fteid.interface_type, FTEID_IF_S1U_SGW);
    }

    #[test]
    fn rewrite_bearer_fteids_none_leaves_context() {
        let mut msg = cs_req_template();
        msg.rewrite_bearer_fteids(FTEID_IF_S1U_SGW, local_ip(), |_| None).unwrap();
        let contexts = msg.bearer_contexts(0).unwrap();
        assert!(contexts[0].fteid.is_none());
    }

    // --- encode/decode ---

    #[test]
    fn encode_decode_preserves_static_ies_and_dynamic_fields() {
        let mut msg = cs_req_template();
        msg.set_header(0, 777);
        msg.set_imsi(&ImsiKey::from_imsi(262010000000001));
        msg.set_sender_fteid(&FteidIe::new(FTEID_IF_S11_MME_GTPC, 9, local_ip()));

        let wire = msg.encode();
        let decoded = GtpMsg::decode(&wire).unwrap();

        assert_eq!(decoded.msg_type().unwrap(), GtpMsgType::CreateSessionRequest);
        assert_eq!(decoded.seq(), 777);
        assert_eq!(decoded.header.teid, Some(0));
        assert_eq!(decoded.imsi(), Some(ImsiKey::from_imsi(262010000000001)));
        assert_eq!(decoded.sender_fteid().unwrap().unwrap().teid, 9);
        // untouched static IE still present
        assert!(decoded.get_ie(IE_RECOVERY, 0).is_some());
    }

    #[test]
    fn encode_sets_length_field() {
        let msg = cs_req_template();
        let wire = msg.encode();
        let hdr = GtpHeader::peek(&wire).unwrap();
        assert_eq!(hdr.length as usize, wire.len() - 4);
    }

    #[test]
    fn decode_rejects_truncated_payload() {
        let mut msg = cs_req_template();
        msg.set_header(1, 1);
        let wire = msg.encode();
        let err = GtpMsg::decode(&wire[..wire.len() - 3]).unwrap_err();
        assert!(matches!(err, GtpError::BufferTooShort { .. }));
    }

    // --- property tests ---

    use proptest::prelude::*;

    proptest! {
        /// Re-encoding a decoded message reproduces the original bytes for
        /// any combination of dynamic header fields.
        #[test]
        fn prop_encode_decode_encode_is_identity(
            teid in any::<u32>(),
            seq in 0u32..0x100_0000,
            imsi in 1u64..1_000_000_000_000_000,
        ) {
            let mut msg = cs_req_template();
            msg.set_header(teid, seq);
            msg.set_imsi(&ImsiKey::from_imsi(imsi));

            let wire = msg.encode();
            let decoded = GtpMsg::decode(&wire).unwrap();
            prop_assert_eq!(decoded.encode(), wire);
            prop_assert_eq!(decoded.seq(), seq);
            prop_assert_eq!(decoded.header.teid, Some(teid));
        }
    }
}
