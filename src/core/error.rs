use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValuationError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(
        "terminal value undefined: discount rate {discount_rate} must exceed terminal growth {terminal_growth}"
    )]
    DivisionUndefined {
        discount_rate: f64,
        terminal_growth: f64,
    },

    #[error("non-finite sample in year {year}: {detail}")]
    SampleFailure { year: u32, detail: String },

    #[error("no valid trials out of {attempted} attempted")]
    NoValidTrials { attempted: u32 },

    #[error("simulation cancelled after {completed} of {requested} trials")]
    Cancelled { completed: u32, requested: u32 },
}

impl ValuationError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Fails with `DivisionUndefined` unless `discount_rate > terminal_growth`.
    pub(crate) fn check_spread(discount_rate: f64, terminal_growth: f64) -> Result<(), Self> {
        if discount_rate > terminal_growth {
            Ok(())
        } else {
            Err(Self::DivisionUndefined {
                discount_rate,
                terminal_growth,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spread_check_rejects_equal_and_inverted_rates() {
        assert!(ValuationError::check_spread(0.10, 0.025).is_ok());
        assert!(matches!(
            ValuationError::check_spread(0.025, 0.025),
            Err(ValuationError::DivisionUndefined { .. })
        ));
        assert!(matches!(
            ValuationError::check_spread(0.02, 0.025),
            Err(ValuationError::DivisionUndefined { .. })
        ));
    }

    #[test]
    fn messages_name_the_failing_input() {
        let err = ValuationError::SampleFailure {
            year: 3,
            detail: "CapEx: draw NaN".to_string(),
        };
        assert!(err.to_string().contains("CapEx"));
        assert!(err.to_string().contains("year 3"));

        let err = ValuationError::NoValidTrials { attempted: 10 };
        assert!(err.to_string().contains("10"));
    }
}
