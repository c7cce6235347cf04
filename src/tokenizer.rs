//! Quote-aware message tokenizer.

const QUOTE: char = '"';

/// Split message text into tokens.
///
/// `?` characters are dropped. A `"` toggles quoted mode: the words inside a
/// quoted span are joined with single spaces into one token. A span still open
/// at the end of input is flushed as a final token.
pub fn tokenize(text: &str) -> Vec<String> {
    let spaced: String = text
        .chars()
        .filter(|c| *c != '?')
        .flat_map(|c| match c {
            QUOTE => vec![' ', QUOTE, ' '],
            other => vec![other],
        })
        .collect();

    let mut tokens = Vec::new();
    let mut quoted: Vec<&str> = Vec::new();
    let mut in_quote = false;

    for word in spaced.split_whitespace() {
        if word.len() == 1 && word.starts_with(QUOTE) {
            if in_quote {
                push_span(&mut tokens, &mut quoted);
            }
            in_quote = !in_quote;
        } else if in_quote {
            quoted.push(word);
        } else {
            tokens.push(word.to_string());
        }
    }

    if in_quote {
        push_span(&mut tokens, &mut quoted);
    }

    tokens
}

fn push_span(tokens: &mut Vec<String>, quoted: &mut Vec<&str>) {
    if !quoted.is_empty() {
        tokens.push(quoted.join(" "));
    }
    quoted.clear();
}

/// Prepare raw chat text for [`tokenize`].
///
/// Slashes become spaces so URLs split into words, and the bot's own
/// `<@ID>` mention markup is removed.
pub fn normalize_for_tokenizing(text: &str, bot_user_id: &str) -> String {
    let mention = format!("<@{}>", bot_user_id);
    text.replace('/', " ").replace(&mention, "")
}
