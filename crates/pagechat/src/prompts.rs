//! Prompt templates for the conversational router.
//!
//! One [`PromptBundle`] parameterizes the whole router: every branch of the
//! state machine picks its system template here, so alternative personas or
//! deployments swap the bundle instead of forking the router.

/// The system prompts and fixed strings one router instance uses.
#[derive(Debug, Clone)]
pub struct PromptBundle {
    /// System prompt for the query-classification call.
    pub classify: String,
    /// Stricter re-prompt appended when the first classification comes back
    /// malformed.
    pub classify_strict_suffix: String,
    /// System prompt for judging whether a message answers the pending
    /// clarifying question.
    pub judge_clarification: String,
    pub greeting: String,
    pub farewell: String,
    pub follow_up: String,
    /// Asks the user the clarifying question.
    pub clarification: String,
    /// Answers after a clarification round, sources attached.
    pub clarification_answer: String,
    /// Answers from retrieved sources.
    pub answer: String,
    pub no_answer: String,
    /// User-visible text returned when something fails internally.
    pub fallback_message: String,
}

impl Default for PromptBundle {
    fn default() -> Self {
        PromptBundle {
            classify: "You screen incoming messages for an assistant that answers \
questions about an organization's public website. Classify the latest user \
message by calling the provided function with boolean values for every field. \
Judge each field on the latest message alone, using the previous exchange only \
where a field says so."
                .to_string(),
            classify_strict_suffix: "\n\nYour previous reply could not be parsed. \
Call the function exactly once and supply every boolean field, unquoted."
                .to_string(),
            judge_clarification: "The assistant just asked the user a clarifying \
question. Decide whether the user's latest message directly answers that \
question, and report the verdict by calling the provided function."
                .to_string(),
            greeting: "You are a friendly assistant for the organization's public \
website. Reply to the user's greeting in one or two short sentences and invite \
their question. Do not invent information."
                .to_string(),
            farewell: "You are a friendly assistant for the organization's public \
website. The user is ending the conversation; wish them well in one short \
sentence."
                .to_string(),
            follow_up: "You are an assistant for the organization's public \
website. The user is following up on your previous answer. Answer using only \
the sources below, which were retrieved for that answer. If the sources do not \
cover the follow-up, say so and suggest rephrasing."
                .to_string(),
            clarification: "You are an assistant for the organization's public \
website. The user's question is too ambiguous to search for. Ask exactly one \
short clarifying question that would let you retrieve the right material. Do \
not answer the question yet."
                .to_string(),
            clarification_answer: "You are an assistant for the organization's \
public website. The user has answered your clarifying question. Answer their \
original question using only the sources below, citing source ids in square \
brackets."
                .to_string(),
            answer: "You are an assistant for the organization's public website. \
Answer the user's question using only the sources below. Cite the source ids \
you used in square brackets. If the sources do not contain the answer, say \
you could not find it."
                .to_string(),
            no_answer: "You are an assistant for the organization's public \
website. The user's message is outside what the website covers. Say so \
politely in one or two sentences and point them to topics you can help with."
                .to_string(),
            fallback_message: "Sorry — I couldn't process that just now. Could \
you rephrase your question, or try again in a moment?"
                .to_string(),
        }
    }
}
