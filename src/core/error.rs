//! Error taxonomy shared by the refresh pipeline and the conversion service

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RateError {
    #[error("Failed to fetch rates: {0}")]
    Fetch(String),

    #[error("Failed to parse rates document: {0}")]
    Parse(String),

    #[error("Unknown currency: {}", .0.join(", "))]
    UnknownCurrency(Vec<String>),

    #[error("Invalid amount: {0:?}")]
    InvalidAmount(String),

    #[error("Rate store unavailable: {0}")]
    StoreUnavailable(String),
}

impl RateError {
    /// Short text shown to chat users. Never carries the internal error string.
    pub fn user_message(&self) -> String {
        match self {
            RateError::UnknownCurrency(codes) => {
                format!("Ошибка: Не удалось найти курс для {}.", codes.join(", "))
            }
            RateError::InvalidAmount(input) => {
                format!("Ошибка: \"{input}\" не является корректной суммой.")
            }
            RateError::StoreUnavailable(_) => {
                "Ошибка: Сервис курсов временно недоступен, попробуйте позже.".to_string()
            }
            RateError::Fetch(_) | RateError::Parse(_) => {
                "Ошибка: Не удалось обновить курсы валют.".to_string()
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, RateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_currency_names_all_codes() {
        let err = RateError::UnknownCurrency(vec!["XXX".to_string(), "YYY".to_string()]);
        assert_eq!(err.to_string(), "Unknown currency: XXX, YYY");
        assert_eq!(
            err.user_message(),
            "Ошибка: Не удалось найти курс для XXX, YYY."
        );
    }

    #[test]
    fn test_store_failure_hides_internal_details() {
        let err = RateError::StoreUnavailable("Connection refused (os error 111)".to_string());
        let message = err.user_message();
        assert!(message.starts_with("Ошибка: "));
        assert!(!message.contains("os error"));
    }
}
