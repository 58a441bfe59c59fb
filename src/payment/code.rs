// region:    --- Imports
use async_trait::async_trait;
use rand::Rng;
use tracing::info;

// endregion: --- Imports

// region:    --- Code Generation

/// Generate a one-time 6-digit numeric verification code.
pub fn generate_verification_code() -> String {
    rand::thread_rng().gen_range(100_000..1_000_000).to_string()
}

// endregion: --- Code Generation

// region:    --- Code Delivery

/// Delivery channel for verification codes.
#[async_trait]
pub trait CodeDelivery: Send + Sync {
    async fn send_code(&self, user_id: i64, code: &str) -> Result<(), String>;
}

/// Stand-in delivery that writes the code to the service log.
/// TODO: wire up the payment provider's SMS gateway once credentials exist.
pub struct LogCodeDelivery;

#[async_trait]
impl CodeDelivery for LogCodeDelivery {
    async fn send_code(&self, user_id: i64, code: &str) -> Result<(), String> {
        info!(
            "{:<12} --> verification code for user {}: {}",
            "CodeDelivery", user_id, code
        );
        Ok(())
    }
}

// endregion: --- Code Delivery

// region:    --- Tests

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_six_digits() {
        for _ in 0..1000 {
            let code = generate_verification_code();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
            // never zero-padded below the 6-digit range
            assert!(code.parse::<u32>().unwrap() >= 100_000);
        }
    }
}

// endregion: --- Tests
