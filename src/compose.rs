//! Template-based email drafting. No model involved; the draft is assembled
//! from a style template plus keyword-driven subject and body selection.

pub struct Draft {
    pub draft: String,
    pub subject: String,
    pub style: String,
}

struct StyleTemplate {
    greeting: &'static str,
    closing: &'static str,
}

fn template(style: &str) -> (&'static str, StyleTemplate) {
    match style {
        "casual" => (
            "casual",
            StyleTemplate {
                greeting: "Hi",
                closing: "Thanks",
            },
        ),
        "formal" => (
            "formal",
            StyleTemplate {
                greeting: "Dear Sir/Madam",
                closing: "Sincerely",
            },
        ),
        _ => (
            "professional",
            StyleTemplate {
                greeting: "Dear",
                closing: "Best regards",
            },
        ),
    }
}

pub fn compose(prompt: &str, style: &str) -> Draft {
    let (style_name, template) = template(style);
    let prompt_lower = prompt.to_lowercase();

    let subject = if ["meeting", "schedule", "appointment"]
        .iter()
        .any(|w| prompt_lower.contains(w))
    {
        "Meeting Request"
    } else if ["follow", "update", "status"].iter().any(|w| prompt_lower.contains(w)) {
        "Follow-up"
    } else if ["thank", "appreciation"].iter().any(|w| prompt_lower.contains(w)) {
        "Thank You"
    } else if ["request", "ask", "need"].iter().any(|w| prompt_lower.contains(w)) {
        "Request for Assistance"
    } else {
        "Re: Your message"
    };

    let body = if prompt_lower.contains("meeting") {
        format!(
            "I hope this email finds you well.\n\n\
             I would like to schedule a meeting to discuss {prompt_lower}. \
             Please let me know your availability for the coming week.\n\n\
             Looking forward to hearing from you."
        )
    } else if prompt_lower.contains("follow") {
        format!(
            "I wanted to follow up regarding {prompt_lower}.\n\n\
             Could you please provide an update on the current status? \
             If you need any additional information from my side, please let me know.\n\n\
             Thank you for your time."
        )
    } else if prompt_lower.contains("thank") {
        format!(
            "Thank you for {prompt_lower}.\n\n\
             I really appreciate your assistance and the time you took to help me \
             with this matter.\n\n\
             Please don't hesitate to reach out if you need anything from my side."
        )
    } else {
        format!(
            "I hope you're doing well.\n\n\
             I'm reaching out regarding {prompt_lower}. I would appreciate your \
             assistance or feedback on this matter.\n\n\
             Please let me know if you need any additional information."
        )
    };

    Draft {
        draft: format!("{},\n\n{body}\n\n{}", template.greeting, template.closing),
        subject: subject.to_string(),
        style: style_name.to_string(),
    }
}
