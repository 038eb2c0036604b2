//! 피스 블록 패킷 정의
//!
//! ```text
//! offset  size  field
//! 0       4     declared_length  (= 9 + payload 길이)
//! 4       1     msg_type         (= 7)
//! 5       4     piece_index      (i32)
//! 9       4     block_offset     (i32)
//! 13      n     payload
//! ```
//!
//! 모든 정수는 네트워크 바이트 순서(빅엔디언).

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// 피스 블록 메시지 타입
pub const MSG_PIECE: u8 = 7;

/// 헤더 길이 (declared_length + msg_type + piece_index + block_offset)
pub const HEADER_LEN: usize = 13;

/// 최소 패킷 길이 (헤더 + 1바이트)
pub const MIN_PACKET_LEN: usize = HEADER_LEN + 1;

/// declared_length 에 포함되는 고정 부분 (msg_type + piece_index + block_offset)
const FIXED_LEN: i64 = 9;

/// 디코딩 실패 사유
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("too short: {len}")]
    TooShort { len: usize },

    #[error("unknown type: {msg_type}")]
    UnknownType { msg_type: u8 },

    #[error("lengths do not match: {actual} ≠ {declared}")]
    LengthMismatch { declared: i64, actual: usize },
}

/// 피스 블록 패킷
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub piece_index: i32,
    pub block_offset: i32,
    pub payload: Bytes,
}

impl Packet {
    pub fn new(piece_index: i32, block_offset: i32, payload: Bytes) -> Self {
        Self {
            piece_index,
            block_offset,
            payload,
        }
    }

    /// 직렬화된 길이
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    /// 바이트로 직렬화
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf.freeze()
    }

    /// 기존 버퍼 뒤에 직렬화
    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.reserve(self.encoded_len());
        buf.put_i32(FIXED_LEN as i32 + self.payload.len() as i32);
        buf.put_u8(MSG_PIECE);
        buf.put_i32(self.piece_index);
        buf.put_i32(self.block_offset);
        buf.put_slice(&self.payload);
    }

    /// 바이트에서 역직렬화
    ///
    /// 검사 순서: 길이 → 메시지 타입 → 선언 길이 일치.
    pub fn decode(datagram: &[u8]) -> Result<Self, DecodeError> {
        if datagram.len() < MIN_PACKET_LEN {
            return Err(DecodeError::TooShort {
                len: datagram.len(),
            });
        }

        let mut header = &datagram[..HEADER_LEN];
        let declared = header.get_i32() as i64 - FIXED_LEN;
        let msg_type = header.get_u8();
        let piece_index = header.get_i32();
        let block_offset = header.get_i32();

        if msg_type != MSG_PIECE {
            return Err(DecodeError::UnknownType { msg_type });
        }

        let payload = &datagram[HEADER_LEN..];
        if declared != payload.len() as i64 {
            return Err(DecodeError::LengthMismatch {
                declared,
                actual: payload.len(),
            });
        }

        Ok(Self {
            piece_index,
            block_offset,
            payload: Bytes::copy_from_slice(payload),
        })
    }
}
