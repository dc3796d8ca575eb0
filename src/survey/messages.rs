//! User-facing message templates for the survey conversation.

/// Static templates.
pub mod templates {
    pub const ERROR: &str = "I'm not really sure what you're saying. Could you try again?";

    pub const INVALID_LOCATION: &str = "Hmm, that doesn't look like a city or zip code I \
         recognize. Could you send a 5-digit zip code or a city name?";

    pub const RESTART_CONFIRMATION: &str = "Great! Let's update your preferences to make \
         sure we find the perfect events for you.";

    pub const SURVEY_COMPLETE: &str = "Thanks for completing the survey! We'll start \
         sending you personalized event digests soon. \u{1F389}";

    pub const COMPLETED_NUDGE: &str =
        "Thanks! If you want to update your preferences, just reply 'START'.";

    pub const PAUSE: &str = "Hey! We've sent a few event digests, but it seems like we're \
         not finding the right stuff for you. We'll pause your digests for now.\n\n\
         If you ever want to restart your personalized free event finder, just reply 'START'.";
}

/// The welcome opener as one SMS-sized block, ending with the first question's
/// prompt so the user's first reply is already an answer.
pub fn welcome_single(first_name: Option<&str>, first_prompt: &str) -> String {
    let greeting = match first_name {
        Some(name) if !name.trim().is_empty() => {
            format!("Welcome to the Weekend Event Finder, {}!", name.trim())
        }
        _ => "Welcome to the Weekend Event Finder!".to_string(),
    };
    format!(
        "{greeting} To personalize your digests, I need to ask a few quick questions.\n\n\
         {first_prompt}"
    )
}

/// The welcome opener as a sequence of short messages, for channels that
/// deliver successive chat bubbles instead of one block. The last entry is
/// the first question's prompt.
pub fn welcome_sequence(first_name: Option<&str>, first_prompt: &str) -> Vec<String> {
    let greeting = match first_name {
        Some(name) if !name.trim().is_empty() => {
            format!("Welcome to the Weekend Event Finder, {}! \u{1F44B}", name.trim())
        }
        _ => "Welcome to the Weekend Event Finder! \u{1F44B}".to_string(),
    };
    vec![
        greeting,
        "To personalize your digests, I need to ask a few quick questions.".to_string(),
        first_prompt.to_string(),
    ]
}

/// Short acknowledgement shown before the next prompt. Empty for the final
/// step so the completion message stands alone.
pub fn step_acknowledgement(question_number: u32, total_questions: u32) -> &'static str {
    if question_number >= total_questions {
        ""
    } else if question_number + 1 == total_questions {
        "Got it! Last question:"
    } else {
        "Got it! Next question:"
    }
}

/// A question prompt prefixed with its step acknowledgement, if any.
pub fn prompt_with_acknowledgement(
    prompt: &str,
    question_number: u32,
    total_questions: u32,
) -> String {
    let ack = step_acknowledgement(question_number, total_questions);
    if ack.is_empty() {
        prompt.to_string()
    } else {
        format!("{ack}\n{prompt}")
    }
}
