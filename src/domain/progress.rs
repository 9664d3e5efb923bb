/// Whole-number completion percentage, rounded down.
/// A course without lessons never reports progress.
pub fn progress_percent(completed: i64, total: i64) -> i32 {
    if total <= 0 || completed <= 0 {
        return 0;
    }
    let completed = completed.min(total);
    ((completed * 100) / total) as i32
}

pub fn is_complete(completed: i64, total: i64) -> bool {
    progress_percent(completed, total) == 100
}

/// Validates a quiz definition: at least two non-blank options and a correct index among them.
pub fn validate_quiz(options: &[String], correct_index: i32) -> Result<(), String> {
    if options.len() < 2 {
        return Err("a quiz needs at least two options".to_string());
    }
    if options.iter().any(|o| o.trim().is_empty()) {
        return Err("quiz options must not be blank".to_string());
    }
    if correct_index < 0 || correct_index as usize >= options.len() {
        return Err(format!(
            "correct_index {correct_index} is outside 0..{}",
            options.len()
        ));
    }
    Ok(())
}
