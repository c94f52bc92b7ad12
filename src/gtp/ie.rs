// GTPv2-C Information Elements.
//
// Generic TLIV framing plus the typed IEs the simulator rewrites on the
// way out: IMSI, F-TEID, EBI and the composite Bearer Context.

use std::net::IpAddr;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::error::{GtpError, GtpResult};
use super::ImsiKey;

/// IE type codes (TS 29.274 §8.1), the subset the core reads or writes.
pub const IE_IMSI: u8 = 1;
pub const IE_CAUSE: u8 = 2;
pub const IE_RECOVERY: u8 = 3;
pub const IE_EBI: u8 = 73;
pub const IE_FTEID: u8 = 87;
pub const IE_BEARER_CONTEXT: u8 = 93;

/// F-TEID interface types used when stamping sender/bearer F-TEIDs.
pub const FTEID_IF_S1U_ENODEB: u8 = 0;
pub const FTEID_IF_S1U_SGW: u8 = 1;
pub const FTEID_IF_S5S8_SGW_GTPU: u8 = 4;
pub const FTEID_IF_S5S8_PGW_GTPU: u8 = 5;
pub const FTEID_IF_S5S8_SGW_GTPC: u8 = 6;
pub const FTEID_IF_S5S8_PGW_GTPC: u8 = 7;
pub const FTEID_IF_S11_MME_GTPC: u8 = 10;
pub const FTEID_IF_S11S4_SGW_GTPC: u8 = 11;

/// Generic IE: type, 4-bit instance, raw value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GtpIe {
    pub ie_type: u8,
    pub instance: u8,
    pub value: Bytes,
}

impl GtpIe {
    pub fn new(ie_type: u8, instance: u8, value: Bytes) -> Self {
        Self { ie_type, instance: instance & 0x0F, value }
    }

    pub fn from_slice(ie_type: u8, instance: u8, value: &[u8]) -> Self {
        Self::new(ie_type, instance, Bytes::copy_from_slice(value))
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.ie_type);
        buf.put_u16(self.value.len() as u16);
        buf.put_u8(self.instance & 0x0F);
        buf.put_slice(&self.value);
    }

    pub fn decode(buf: &mut Bytes) -> GtpResult<Self> {
        if buf.remaining() < 4 {
            return Err(GtpError::BufferTooShort { needed: 4, available: buf.remaining() });
        }
        let ie_type = buf.get_u8();
        let length = buf.get_u16() as usize;
        let instance = buf.get_u8() & 0x0F;
        if buf.remaining() < length {
            return Err(GtpError::BufferTooShort { needed: length, available: buf.remaining() });
        }
        let value = buf.copy_to_bytes(length);
        Ok(Self { ie_type, instance, value })
    }

    /// Encoded length including the 4-octet TLIV preamble.
    pub fn encoded_len(&self) -> usize {
        4 + self.value.len()
    }

    pub fn imsi(key: &ImsiKey) -> Self {
        Self::from_slice(IE_IMSI, 0, key.as_bytes())
    }
}

/// F-TEID (Fully Qualified TEID) IE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FteidIe {
    pub interface_type: u8,
    pub teid: u32,
    pub ipv4: Option<[u8; 4]>,
    pub ipv6: Option<[u8; 16]>,
}

impl FteidIe {
    pub fn new(interface_type: u8, teid: u32, addr: IpAddr) -> Self {
        match addr {
            IpAddr::V4(v4) => Self {
                interface_type,
                teid,
                ipv4: Some(v4.octets()),
                ipv6: None,
            },
            IpAddr::V6(v6) => Self {
                interface_type,
                teid,
                ipv4: None,
                ipv6: Some(v6.octets()),
            },
        }
    }

    pub fn to_ie(&self, instance: u8) -> GtpIe {
        let mut value = BytesMut::with_capacity(5 + 4 + 16);
        let mut flags = self.interface_type & 0x3F;
        if self.ipv4.is_some() {
            flags |= 0x80;
        }
        if self.ipv6.is_some() {
            flags |= 0x40;
        }
        value.put_u8(flags);
        value.put_u32(self.teid);
        if let Some(v4) = &self.ipv4 {
            value.put_slice(v4);
        }
        if let Some(v6) = &self.ipv6 {
            value.put_slice(v6);
        }
        GtpIe::new(IE_FTEID, instance, value.freeze())
    }

    pub fn from_value(value: &[u8]) -> GtpResult<Self> {
        if value.len() < 5 {
            return Err(GtpError::BufferTooShort { needed: 5, available: value.len() });
        }
        let flags = value[0];
        let has_v4 = (flags & 0x80) != 0;
        let has_v6 = (flags & 0x40) != 0;
        let interface_type = flags & 0x3F;
        let teid = u32::from_be_bytes([value[1], value[2], value[3], value[4]]);

        let mut off = 5;
        let ipv4 = if has_v4 {
            if value.len() < off + 4 {
                return Err(GtpError::MalformedIe { ie_type: IE_FTEID, reason: "short v4 address" });
            }
            let mut a = [0u8; 4];
            a.copy_from_slice(&value[off..off + 4]);
            off += 4;
            Some(a)
        } else {
            None
        };
        let ipv6 = if has_v6 {
            if value.len() < off + 16 {
                return Err(GtpError::MalformedIe { ie_type: IE_FTEID, reason: "short v6 address" });
            }
            let mut a = [0u8; 16];
            a.copy_from_slice(&value[off..off + 16]);
            Some(a)
        } else {
            None
        };

        Ok(Self { interface_type, teid, ipv4, ipv6 })
    }
}

/// Composite Bearer Context IE. The value is itself a sequence of child
/// IEs; the simulator cares about the EBI and the GTP-U F-TEID, the rest
/// is carried opaquely so templates survive rewriting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BearerContextIe {
    pub ebi: u8,
    pub fteid: Option<FteidIe>,
    /// F-TEID instance as it appeared in (or will be written to) the child
    /// list.
    pub fteid_instance: u8,
    other: Vec<GtpIe>,
}

impl BearerContextIe {
    pub fn new(ebi: u8, fteid: Option<FteidIe>) -> Self {
        Self { ebi, fteid, fteid_instance: 0, other: Vec::new() }
    }

    pub fn from_value(value: &Bytes) -> GtpResult<Self> {
        let mut cursor = value.clone();
        let mut ebi = None;
        let mut fteid = None;
        let mut fteid_instance = 0;
        let mut other = Vec::new();

        while cursor.has_remaining() {
            let child = GtpIe::decode(&mut cursor)?;
            match child.ie_type {
                IE_EBI if ebi.is_none() => {
                    if child.value.is_empty() {
                        return Err(GtpError::MalformedIe { ie_type: IE_EBI, reason: "empty EBI" });
                    }
                    ebi = Some(child.value[0] & 0x0F);
                }
                IE_FTEID if fteid.is_none() => {
                    fteid = Some(FteidIe::from_value(&child.value)?);
                    fteid_instance = child.instance;
                }
                _ => other.push(child),
            }
        }

        let ebi = ebi.ok_or(GtpError::MissingIe(IE_EBI))?;
        Ok(Self { ebi, fteid, fteid_instance, other })
    }

    pub fn to_ie(&self, instance: u8) -> GtpIe {
        let mut value = BytesMut::new();
        GtpIe::from_slice(IE_EBI, 0, &[self.ebi & 0x0F]).encode(&mut value);
        if let Some(fteid) = &self.fteid {
            fteid.to_ie(self.fteid_instance).encode(&mut value);
        }
        for child in &self.other {
            child.encode(&mut value);
        }
        GtpIe::new(IE_BEARER_CONTEXT, instance, value.freeze())
    }
}
