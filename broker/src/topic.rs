//! MQTT topic filter matching.

/// Check whether `topic` is matched by the subscription `filter`.
///
/// `+` matches exactly one level and `#` matches the remaining levels,
/// including none, so `a/#` matches `a`.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    if filter == topic || filter == "#" {
        return true;
    }

    let mut topic_levels = topic.split('/');
    for level in filter.split('/') {
        if level == "#" {
            return true;
        }
        match topic_levels.next() {
            Some(actual) if level == "+" || level == actual => continue,
            _ => return false,
        }
    }

    topic_levels.next().is_none()
}

/// Whether `filter` is a syntactically valid topic filter
pub fn is_valid_filter(filter: &str) -> bool {
    if filter.is_empty() {
        return false;
    }

    let levels: Vec<&str> = filter.split('/').collect();
    levels.iter().enumerate().all(|(index, level)| match *level {
        "#" => index == levels.len() - 1,
        "+" => true,
        other => !other.contains(['+', '#']),
    })
}
