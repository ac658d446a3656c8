pub mod mock;
pub mod prompts;
pub mod provider;

pub use mock::{MockProvider, MockResponse};
pub use provider::ChatCompletionsProvider;
