//! 피스와 블록 정의
//!
//! - Piece: 엔진이 독립적으로 검증하는 토렌트 조각
//! - Block: 데이터그램 하나에 실리는 피스의 일부 (기본 16KB)

use std::time::Instant;

use bytes::{Bytes, BytesMut};

use crate::packet::Packet;
use crate::progress::{Progress, RangeError};
use crate::{Error, Result};

/// 수신 중인 피스 (수신측)
#[derive(Debug)]
pub struct PieceBuffer {
    /// 피스 인덱스
    pub piece: u32,

    /// 수신 구간
    progress: Progress,

    /// 피스 데이터
    data: BytesMut,

    /// 생성 시간
    pub created_at: Instant,
}

impl PieceBuffer {
    pub fn new(piece: u32, length: usize) -> Self {
        let mut data = BytesMut::with_capacity(length);
        data.resize(length, 0);

        Self {
            piece,
            progress: Progress::new(length),
            data,
            created_at: Instant::now(),
        }
    }

    /// 블록 삽입
    ///
    /// 범위를 벗어나거나 이미 가진 블록이면 데이터는 쓰지 않는다.
    pub fn add_block(&mut self, offset: usize, block: &[u8]) -> std::result::Result<(), RangeError> {
        self.progress.try_add(offset, block.len())?;
        self.data[offset..offset + block.len()].copy_from_slice(block);
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.progress.is_complete()
    }

    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    /// 완료된 데이터 추출
    pub fn into_data(self) -> Bytes {
        self.data.freeze()
    }
}

/// 피스를 블록 패킷으로 분할 (송신측)
#[derive(Debug, Clone)]
pub struct BlockBuilder {
    block_size: usize,
}

impl BlockBuilder {
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size: block_size.max(1),
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// 피스 데이터를 연속된 블록으로 분할 (마지막 블록은 짧을 수 있음)
    pub fn split_into_blocks(&self, piece: u32, data: &Bytes) -> Result<Vec<Packet>> {
        let piece_index =
            i32::try_from(piece).map_err(|_| Error::FieldOverflow { piece, offset: 0 })?;

        (0..data.len())
            .step_by(self.block_size)
            .map(|offset| -> Result<Packet> {
                let end = (offset + self.block_size).min(data.len());
                let block_offset =
                    i32::try_from(offset).map_err(|_| Error::FieldOverflow { piece, offset })?;
                Ok(Packet::new(piece_index, block_offset, data.slice(offset..end)))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_sizes() {
        let builder = BlockBuilder::new(16384);
        let data = Bytes::from(vec![7u8; 16384 * 2 + 100]);
        let blocks = builder.split_into_blocks(5, &data).unwrap();

        let sizes: Vec<usize> = blocks.iter().map(|b| b.payload.len()).collect();
        let offsets: Vec<i32> = blocks.iter().map(|b| b.block_offset).collect();
        assert_eq!(sizes, vec![16384, 16384, 100]);
        assert_eq!(offsets, vec![0, 16384, 32768]);
        assert!(blocks.iter().all(|b| b.piece_index == 5));
    }

    #[test]
    fn test_split_exact_multiple_and_empty() {
        let builder = BlockBuilder::new(4);
        assert_eq!(
            builder
                .split_into_blocks(0, &Bytes::from_static(b"abcdefgh"))
                .unwrap()
                .len(),
            2
        );
        assert!(builder.split_into_blocks(0, &Bytes::new()).unwrap().is_empty());
    }

    #[test]
    fn test_piece_index_overflow() {
        let builder = BlockBuilder::new(4);
        assert!(matches!(
            builder.split_into_blocks(u32::MAX, &Bytes::from_static(b"ab")),
            Err(Error::FieldOverflow { .. })
        ));
    }

    #[test]
    fn test_piece_assembly_any_order() {
        let builder = BlockBuilder::new(100);
        let data: Bytes = (0..250u32).map(|i| i as u8).collect::<Vec<u8>>().into();
        let mut blocks = builder.split_into_blocks(1, &data).unwrap();
        blocks.reverse();

        let mut piece = PieceBuffer::new(1, 250);
        for block in &blocks {
            assert!(!piece.is_complete());
            piece
                .add_block(block.block_offset as usize, &block.payload)
                .unwrap();
        }

        assert!(piece.is_complete());
        assert_eq!(piece.into_data(), data);
    }

    #[test]
    fn test_rejected_block_not_written() {
        let mut piece = PieceBuffer::new(0, 8);
        piece.add_block(0, b"abcd").unwrap();
        assert!(matches!(
            piece.add_block(1, b"XX"),
            Err(RangeError::AlreadyHave { .. })
        ));
        assert!(matches!(
            piece.add_block(6, b"XYZ"),
            Err(RangeError::OutOfBounds { .. })
        ));
        piece.add_block(4, b"efgh").unwrap();
        assert_eq!(&piece.into_data()[..], b"abcdefgh");
    }
}
