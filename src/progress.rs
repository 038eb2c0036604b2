//! 범위 기반 진행률 추적
//!
//! 고정 크기 영역에서 수신된 `[start, end)` 구간들을 관리한다.
//! 구간 목록은 항상 오름차순이며, 겹치거나 맞닿은 구간은 하나로 합쳐진다.

use std::fmt;
use std::ops::Range;

use thiserror::Error;

/// 구간 추가 실패 사유
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeError {
    /// 시작/길이가 영역을 벗어남
    #[error("유효하지 않은 범위: start={start}, length={length}, size={size}")]
    OutOfBounds {
        start: usize,
        length: usize,
        size: usize,
    },

    /// 이미 가진 데이터
    #[error("이미 수신한 범위: start={start}, length={length}")]
    AlreadyHave { start: usize, length: usize },
}

/// 수신 진행률 (구간 추적기)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    size: usize,
    have: Vec<Range<usize>>,
    complete: bool,
}

impl Progress {
    /// `size` 바이트 영역에 대한 빈 추적기
    pub fn new(size: usize) -> Self {
        Self {
            size,
            have: Vec::new(),
            complete: false,
        }
    }

    /// 구간 추가
    ///
    /// 범위가 잘못되었거나 이미 가진 구간이면 `false`를 반환하고 상태는 그대로 둔다.
    /// 길이 0인 구간과 `start >= size`인 구간도 잘못된 범위로 본다 (폭 0 구간을 저장하지 않음).
    pub fn add(&mut self, start: usize, length: usize) -> bool {
        self.try_add(start, length).is_ok()
    }

    /// 구간 추가 (실패 사유 포함)
    pub fn try_add(&mut self, start: usize, length: usize) -> Result<(), RangeError> {
        let end = match start.checked_add(length) {
            Some(end) if length > 0 && start < self.size && end <= self.size => end,
            _ => {
                return Err(RangeError::OutOfBounds {
                    start,
                    length,
                    size: self.size,
                })
            }
        };

        // 정렬 위치에 삽입
        let mut index = self.have.len();
        for (i, have) in self.have.iter().enumerate() {
            if start >= have.start && end <= have.end {
                return Err(RangeError::AlreadyHave { start, length });
            }
            if start <= have.start {
                index = i;
                break;
            }
        }
        self.have.insert(index, start..end);

        // 병합 (한 번의 왼쪽 → 오른쪽 패스)
        let mut folded: Vec<Range<usize>> = Vec::with_capacity(self.have.len());
        for cur in self.have.drain(..) {
            match folded.last_mut() {
                Some(prev) if cur.start <= prev.end => {
                    prev.start = prev.start.min(cur.start);
                    prev.end = prev.end.max(cur.end);
                }
                _ => folded.push(cur),
            }
        }
        self.have = folded;

        self.complete = self.have.len() == 1 && self.have[0] == (0..self.size);
        Ok(())
    }

    /// 영역 전체 크기
    pub fn size(&self) -> usize {
        self.size
    }

    /// 수신된 구간 목록 (오름차순, 서로 떨어져 있음)
    pub fn ranges(&self) -> &[Range<usize>] {
        &self.have
    }

    /// 수신된 총 바이트 수
    pub fn covered(&self) -> usize {
        self.have.iter().map(|r| r.end - r.start).sum()
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// 아직 받지 못한 구간 목록
    pub fn missing(&self) -> Vec<Range<usize>> {
        let mut gaps = Vec::new();
        let mut cursor = 0;
        for have in &self.have {
            if have.start > cursor {
                gaps.push(cursor..have.start);
            }
            cursor = have.end;
        }
        if cursor < self.size {
            gaps.push(cursor..self.size);
        }
        gaps
    }

    /// 수신률 (0.0 ~ 100.0)
    pub fn percentage(&self) -> f64 {
        if self.size == 0 {
            return 0.0;
        }
        self.covered() as f64 / self.size as f64 * 100.0
    }
}

impl fmt::Display for Progress {
    /// 유효숫자 3자리 + `%` (예: `20%`, `33.3%`)
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", significant(self.percentage(), 3))
    }
}

/// 유효숫자 `digits`자리로 반올림, 뒤쪽 0 제거
fn significant(value: f64, digits: i32) -> String {
    if value == 0.0 || !value.is_finite() {
        return "0".to_string();
    }
    let magnitude = value.abs().log10().floor() as i32;
    let decimals = (digits - 1 - magnitude).max(0) as usize;
    let s = format!("{:.*}", decimals, value);
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        s
    }
}
