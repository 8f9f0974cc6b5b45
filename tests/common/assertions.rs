/// Backend command assertion utilities
#[allow(dead_code)]
pub fn assert_args_contain(args: &[String], flag: &str) {
    assert!(
        args.iter().any(|a| a == flag),
        "Expected command to contain '{}' but it didn't.\nCommand: {}",
        flag,
        args.join(" ")
    );
}

/// Check that a command does NOT contain a specific argument
#[allow(dead_code)]
pub fn assert_args_not_contain(args: &[String], flag: &str) {
    assert!(
        !args.iter().any(|a| a == flag),
        "Expected command to NOT contain '{}' but it did.\nCommand: {}",
        flag,
        args.join(" ")
    );
}

/// Check that `flag` is immediately followed by `value`
#[allow(dead_code)]
pub fn assert_flag_value(args: &[String], flag: &str, value: &str) {
    assert_eq!(
        flag_value(args, flag),
        Some(value),
        "Expected '{} {}' in command.\nCommand: {}",
        flag,
        value,
        args.join(" ")
    );
}

/// Value following the first occurrence of `flag`
#[allow(dead_code)]
pub fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

/// Position of the first occurrence of `arg`
#[allow(dead_code)]
pub fn position(args: &[String], arg: &str) -> usize {
    args.iter()
        .position(|a| a == arg)
        .unwrap_or_else(|| panic!("'{}' missing from command: {}", arg, args.join(" ")))
}

/// Assert `first` appears before `second`
#[allow(dead_code)]
pub fn assert_before(args: &[String], first: &str, second: &str) {
    assert!(
        position(args, first) < position(args, second),
        "Expected '{}' before '{}'.\nCommand: {}",
        first,
        second,
        args.join(" ")
    );
}

/// Assert `arg` occurs exactly `count` times
#[allow(dead_code)]
pub fn assert_occurrences(args: &[String], arg: &str, count: usize) {
    let found = args.iter().filter(|a| *a == arg).count();
    assert_eq!(
        found,
        count,
        "Expected '{}' {} time(s), found {}.\nCommand: {}",
        arg,
        count,
        found,
        args.join(" ")
    );
}
