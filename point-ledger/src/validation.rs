//! Input range checks, applied before any gated work

use crate::{types::UserId, Error, Result};

/// Accept only positive user identifiers
pub fn validate_user_id(raw: i64) -> Result<UserId> {
    if raw <= 0 {
        return Err(Error::InvalidUserId(raw));
    }
    Ok(UserId::new(raw as u64))
}

/// Accept only positive amounts
pub fn validate_amount(raw: i64) -> Result<u64> {
    if raw <= 0 {
        return Err(Error::InvalidAmount(raw));
    }
    Ok(raw as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_id_bounds() {
        assert_eq!(validate_user_id(1).unwrap(), UserId::new(1));
        assert_eq!(validate_user_id(i64::MAX).unwrap().get(), i64::MAX as u64);
        assert!(matches!(validate_user_id(0), Err(Error::InvalidUserId(0))));
        assert!(matches!(validate_user_id(-5), Err(Error::InvalidUserId(-5))));
    }

    #[test]
    fn test_amount_bounds() {
        assert_eq!(validate_amount(10).unwrap(), 10);
        assert!(matches!(validate_amount(0), Err(Error::InvalidAmount(0))));
        assert!(matches!(validate_amount(-100), Err(Error::InvalidAmount(-100))));
    }
}
