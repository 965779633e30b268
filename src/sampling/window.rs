//! Window scheduling
//!
//! A level of `total_length` tokens is covered by windows of `n_ctx` tokens
//! whose starts advance by `hop_length`. The last start is pulled back so its
//! window ends exactly at `total_length`.

use crate::error::{CascadeError, Result};

/// A region of a level's code sequence handed to the prior in one call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: usize,
    /// Tokens the prior returns, history included
    pub sample_tokens: usize,
}

impl Window {
    pub fn new(start: usize, sample_tokens: usize) -> Self {
        Self {
            start,
            sample_tokens,
        }
    }

    pub fn end(&self) -> usize {
        self.start + self.sample_tokens
    }
}

/// Ordered window starts covering `[0, total_length)`.
///
/// Starts are strictly increasing, consecutive starts differ by at most
/// `hop_length`, and the last window ends at `total_length`.
pub fn window_starts(total_length: usize, n_ctx: usize, hop_length: usize) -> Result<Vec<usize>> {
    if hop_length == 0 || hop_length > n_ctx {
        return Err(CascadeError::InvalidHopLength { hop_length, n_ctx });
    }
    if total_length < n_ctx {
        return Err(CascadeError::WindowExceedsTarget {
            total_length,
            n_ctx,
        });
    }

    let last = total_length - n_ctx;
    let mut starts = Vec::new();
    for start in (0..last + hop_length).step_by(hop_length) {
        if start >= last {
            starts.push(last);
            break;
        }
        starts.push(start);
    }
    Ok(starts)
}

/// The single window that samples `remaining` more tokens after `current`.
///
/// While the history is short the window starts at 0 and conditions on all of
/// it; afterwards it slides so that it ends at `current + remaining`.
pub fn partial_window(current: usize, n_ctx: usize, remaining: usize) -> Window {
    let end = current + remaining;
    if end < n_ctx {
        Window::new(0, end)
    } else {
        Window::new(end - n_ctx, n_ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(100, 40, 20 => vec![0, 20, 40, 60]; "exact tiling")]
    #[test_case(100, 40, 30 => vec![0, 30, 60]; "clamped final start")]
    #[test_case(40, 40, 20 => vec![0]; "single window")]
    #[test_case(10, 4, 2 => vec![0, 2, 4, 6]; "small level")]
    #[test_case(10, 4, 4 => vec![0, 4, 6]; "full hop")]
    #[test_case(9, 4, 1 => vec![0, 1, 2, 3, 4, 5]; "unit hop")]
    fn test_window_starts(total: usize, n_ctx: usize, hop: usize) -> Vec<usize> {
        window_starts(total, n_ctx, hop).unwrap()
    }

    #[test_case(100, 40, 0; "zero hop")]
    #[test_case(100, 40, 41; "hop beyond context")]
    fn test_invalid_hop(total: usize, n_ctx: usize, hop: usize) {
        let err = window_starts(total, n_ctx, hop).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_HOP_LENGTH");
    }

    #[test]
    fn test_level_shorter_than_context() {
        let err = window_starts(30, 40, 20).unwrap_err();
        assert_eq!(err.error_code(), "WINDOW_EXCEEDS_TARGET");
    }

    #[test]
    fn test_starts_cover_level() {
        for total in 8..40usize {
            for hop in 1..=8usize {
                let starts = window_starts(total, 8, hop).unwrap();
                assert_eq!(starts[0], 0);
                assert_eq!(*starts.last().unwrap() + 8, total);
                assert!(starts.windows(2).all(|w| w[0] < w[1] && w[1] - w[0] <= hop));
            }
        }
    }

    #[test_case(0, 50, 30 => Window::new(0, 30); "fresh level")]
    #[test_case(10, 50, 30 => Window::new(0, 40); "short history")]
    #[test_case(40, 50, 30 => Window::new(20, 50); "sliding")]
    #[test_case(20, 50, 30 => Window::new(0, 50); "exactly one context")]
    fn test_partial_window(current: usize, n_ctx: usize, remaining: usize) -> Window {
        partial_window(current, n_ctx, remaining)
    }
}
