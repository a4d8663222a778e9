use super::*;

#[test]
fn test_default_config() {
  let config = SplitConfig::default_for(3);
  assert_eq!(config.split_threshold, 1000);
  assert_eq!(config.split_into.as_slice(), &[5, 5, 5]);
  assert_eq!(config.max_depth, 5);
  assert!(!config.memory_budget_enabled());
  assert_eq!(config.children_per_split(), 125);
  assert!(config.validate(3).is_ok());
}

#[test]
fn test_memory_budget() {
  let config = SplitConfig::default_for(1).with_memory_budget(16);
  assert!(config.memory_budget_enabled());
  assert_eq!(config.memory_budget_boxes, 16);
}

#[test]
fn test_zero_threshold_rejected() {
  let config = SplitConfig::uniform(2, 2, 0, 4);
  assert!(matches!(
    config.validate(2),
    Err(BoxError::InvalidConfiguration(_))
  ));
}

#[test]
fn test_split_factor_below_two_rejected() {
  let mut config = SplitConfig::uniform(3, 2, 10, 4);
  config.split_into[1] = 1;
  let err = config.validate(3).unwrap_err();
  assert_eq!(
    err.to_string(),
    "invalid configuration: split_into[1] = 1, must be at least 2"
  );
}

#[test]
fn test_split_into_length_must_match_dimensions() {
  let config = SplitConfig::uniform(2, 2, 10, 4);
  assert!(config.validate(3).is_err());
  assert!(config.validate(2).is_ok());
}

#[test]
fn test_overflowing_split_rejected() {
  let config = SplitConfig::uniform(8, 1 << 10, 10, 4);
  assert!(config.validate(8).is_err());
}

/// Depth 0 is a legal limit: the root can never split.
#[test]
fn test_zero_max_depth_is_valid() {
  let config = SplitConfig::uniform(1, 2, 1, 0);
  assert!(config.validate(1).is_ok());
}
