// ID Provider Port (for deterministic testing)

/// ID provider interface (allows deterministic IDs in tests)
pub trait IdProvider: Send + Sync {
    /// Generate a new unique entry ID
    fn generate_id(&self) -> String;
}

/// UUID v4 provider (production)
pub struct UuidProvider;

impl IdProvider for UuidProvider {
    fn generate_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MAX_ID_LEN;

    #[test]
    fn test_uuid_ids_are_unique_and_fit() {
        let a = UuidProvider.generate_id();
        let b = UuidProvider.generate_id();
        assert_ne!(a, b);
        assert!(a.len() <= MAX_ID_LEN);
    }
}
