use crate::types::{Classification, Label, Method};

/// Per-keyword confidence weight and its saturation cap. One matched keyword
/// classifies at 0.2, four or more saturate at 0.8 so a rule hit never
/// reports the certainty reserved for the model path.
const KEYWORD_WEIGHT: f64 = 0.2;
const CONFIDENCE_CAP: f64 = 0.8;

/// Keyword tables per label, matched by lowercase substring containment.
/// Declaration order is the tie-break: on equal scores the earlier table
/// wins, so Spam outranks Important outranks Work outranks Personal.
const PATTERNS: &[(Label, &[&str])] = &[
    (
        Label::Spam,
        &[
            "unsubscribe",
            "click here",
            "limited time",
            "act now",
            "free money",
            "guarantee",
            "winner",
            "congratulations",
            "viagra",
            "casino",
            "lottery",
            "inheritance",
            "you won",
        ],
    ),
    (
        Label::Important,
        &[
            "urgent",
            "important",
            "asap",
            "deadline",
            "action required",
            "verification",
            "security",
            "password",
            "account",
            "confirm",
            "invoice",
            "payment",
            "bill",
            "receipt",
        ],
    ),
    (
        Label::Work,
        &[
            "meeting",
            "project",
            "deadline",
            "report",
            "team",
            "client",
            "business",
            "office",
            "conference",
            "schedule",
            "proposal",
            "contract",
            "budget",
            "quarterly",
        ],
    ),
    (
        Label::Personal,
        &[
            "family",
            "friend",
            "vacation",
            "birthday",
            "dinner",
            "weekend",
            "party",
            "holiday",
            "personal",
            "home",
        ],
    ),
];

/// Rule-based email classification. Pure function of its inputs: the only
/// state it touches is the immutable keyword tables.
pub fn classify(content: &str, subject: &str) -> Classification {
    let full_text = format!("{subject} {content}").to_lowercase();

    let mut best: Option<(Label, usize)> = None;
    for (label, keywords) in PATTERNS {
        let score = keywords.iter().filter(|kw| full_text.contains(**kw)).count();
        // Strict comparison keeps the first-declared label on ties.
        if best.is_none_or(|(_, s)| score > s) {
            best = Some((*label, score));
        }
    }

    match best {
        Some((label, score)) if score > 0 => Classification {
            label,
            confidence: (score as f64 * KEYWORD_WEIGHT).min(CONFIDENCE_CAP),
            reasoning: format!("Keyword match: {score} pattern(s) for {label:?}"),
            method: Method::RuleBased,
        },
        _ => Classification {
            label: Label::Review,
            confidence: 0.5,
            reasoning: "No clear classification patterns found - requires manual review".into(),
            method: Method::RuleBased,
        },
    }
}
