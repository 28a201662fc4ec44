//! Splitting a token list into pipeline stages.
//!
//! A pipeline is a flat list of tokens in which SEPARATOR tokens mark the
//! boundaries between stages. Validation happens once, up front, in the
//! parent; the per-stage queries below are plain index arithmetic so that a
//! forked child can locate its own tokens without allocating.

use std::fmt;
use std::ops::Range;

/// The token that separates pipeline stages.
pub const SEPARATOR: &str = "|";

/// Reasons a token list fails pipeline validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineParseError {
    /// No tokens at all.
    Empty,
    /// A separator with no command before it.
    LeadingSeparator,
    /// A separator with no command after it.
    TrailingSeparator,
    /// Two separators with no command between them.
    AdjacentSeparators,
}

impl fmt::Display for PipelineParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            PipelineParseError::Empty => "empty command line",
            PipelineParseError::LeadingSeparator => "missing command before '|'",
            PipelineParseError::TrailingSeparator => "missing command after '|'",
            PipelineParseError::AdjacentSeparators => "missing command between '|' and '|'",
        };
        f.write_str(msg)
    }
}

/// Validate the token list as a pipeline and return the number of stages.
/// Every separator must have a command token on both sides.
pub fn pipeline_stage_count(tokens: &[String]) -> Result<usize, PipelineParseError> {
    if tokens.is_empty() {
        return Err(PipelineParseError::Empty);
    }
    if tokens.first().map(String::as_str) == Some(SEPARATOR) {
        return Err(PipelineParseError::LeadingSeparator);
    }
    if tokens.last().map(String::as_str) == Some(SEPARATOR) {
        return Err(PipelineParseError::TrailingSeparator);
    }
    let mut stages = 1;
    let mut prev_was_separator = false;
    for tok in tokens {
        if tok == SEPARATOR {
            if prev_was_separator {
                return Err(PipelineParseError::AdjacentSeparators);
            }
            stages += 1;
            prev_was_separator = true;
        } else {
            prev_was_separator = false;
        }
    }
    Ok(stages)
}

/// Failure to locate a stage's separators. With a token list that passed
/// pipeline_stage_count this is unreachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentError;

/// Compute the token range holding `stage` within a pipeline of `n_stages`
/// stages. The trailing stages are peeled off back to front, so each stage
/// finds its end at the last separator still in range. Performs no allocation.
pub fn stage_bounds(
    tokens: &[String],
    stage: usize,
    n_stages: usize,
) -> Result<Range<usize>, SegmentError> {
    assert!(stage < n_stages, "Stage out of range");
    let mut end = tokens.len();
    for _ in 0..(n_stages - 1 - stage) {
        end = last_separator(&tokens[..end]).ok_or(SegmentError)?;
    }
    let start = if stage > 0 {
        last_separator(&tokens[..end]).ok_or(SegmentError)? + 1
    } else {
        0
    };
    Ok(start..end)
}

/// The pipe boundaries a stage is wired to: the boundary whose read end
/// becomes the stage's stdin, and the boundary whose write end becomes its
/// stdout. The first stage has no read boundary and the last stage has no
/// write boundary.
pub fn stage_endpoints(stage: usize, n_stages: usize) -> (Option<usize>, Option<usize>) {
    assert!(stage < n_stages, "Stage out of range");
    let read_boundary = if stage > 0 { Some(stage - 1) } else { None };
    let write_boundary = if stage + 1 < n_stages {
        Some(stage)
    } else {
        None
    };
    (read_boundary, write_boundary)
}

fn last_separator(tokens: &[String]) -> Option<usize> {
    tokens.iter().rposition(|tok| tok == SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::{pipeline_stage_count, stage_bounds, stage_endpoints, PipelineParseError};

    fn toks(line: &str) -> Vec<String> {
        line.split_whitespace().map(str::to_owned).collect()
    }

    #[test]
    fn test_stage_count() {
        assert_eq!(pipeline_stage_count(&toks("ls")), Ok(1));
        assert_eq!(pipeline_stage_count(&toks("ls -l | wc")), Ok(2));
        assert_eq!(pipeline_stage_count(&toks("a | b | c")), Ok(3));
        assert_eq!(pipeline_stage_count(&[]), Err(PipelineParseError::Empty));
        assert_eq!(
            pipeline_stage_count(&toks("| wc")),
            Err(PipelineParseError::LeadingSeparator)
        );
        assert_eq!(
            pipeline_stage_count(&toks("ls |")),
            Err(PipelineParseError::TrailingSeparator)
        );
        assert_eq!(
            pipeline_stage_count(&toks("ls | | wc")),
            Err(PipelineParseError::AdjacentSeparators)
        );
    }

    #[test]
    fn test_stage_bounds() {
        let tokens = toks("cat in.txt | sort -r | uniq");
        assert_eq!(stage_bounds(&tokens, 0, 3), Ok(0..2));
        assert_eq!(stage_bounds(&tokens, 1, 3), Ok(3..5));
        assert_eq!(stage_bounds(&tokens, 2, 3), Ok(6..7));

        let single = toks("echo hello world");
        assert_eq!(stage_bounds(&single, 0, 1), Ok(0..3));

        // A missing separator is reported rather than producing a bogus range.
        assert!(stage_bounds(&single, 0, 2).is_err());
    }

    #[test]
    fn test_stage_endpoints() {
        assert_eq!(stage_endpoints(0, 1), (None, None));
        assert_eq!(stage_endpoints(0, 3), (None, Some(0)));
        assert_eq!(stage_endpoints(1, 3), (Some(0), Some(1)));
        assert_eq!(stage_endpoints(2, 3), (Some(1), None));
    }
}
