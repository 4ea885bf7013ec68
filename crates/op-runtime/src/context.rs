// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Per-step state handed to operator phases.

/// Autoregressive generation state for one request.
///
/// Step 0 is the prefill (context) pass over the whole prompt; every later
/// step decodes one token per sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct GenerateContext {
    /// Sequences decoded together.
    pub batch_size: usize,
    /// Prompt length in tokens.
    pub input_len: usize,
    /// Current decode position, 0 during prefill.
    pub step: usize,
    /// Upper bound on prompt plus generated tokens.
    pub max_length: usize,
}

impl GenerateContext {
    pub fn new(batch_size: usize, input_len: usize, max_length: usize) -> Self {
        Self {
            batch_size,
            input_len,
            step: 0,
            max_length,
        }
    }

    /// `true` on the prompt pass.
    pub fn is_prefill(&self) -> bool {
        self.step == 0
    }

    /// Tokens each sequence feeds in this step.
    pub fn tokens_this_step(&self) -> usize {
        if self.is_prefill() {
            self.input_len
        } else {
            1
        }
    }

    /// Sequence length once this step has run.
    pub fn current_len(&self) -> usize {
        self.input_len + self.step
    }

    /// `true` once the length limit is reached.
    pub fn is_finished(&self) -> bool {
        self.current_len() >= self.max_length
    }

    /// Moves to the next decode position.
    pub fn advance(&mut self) {
        self.step += 1;
    }
}

/// State shared by every operator during one step.
#[derive(Debug, Clone, Default)]
pub struct RuntimeContext {
    /// `true` when this step processes the prompt.
    pub is_context: bool,
    /// Generation state of the request being stepped.
    pub generate: GenerateContext,
}

impl RuntimeContext {
    pub fn new(generate: GenerateContext) -> Self {
        Self {
            is_context: generate.is_prefill(),
            generate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefill_then_decode() {
        let mut gen = GenerateContext::new(2, 5, 7);
        assert!(gen.is_prefill());
        assert_eq!(gen.tokens_this_step(), 5);
        assert!(RuntimeContext::new(gen.clone()).is_context);

        gen.advance();
        assert!(!gen.is_prefill());
        assert_eq!(gen.tokens_this_step(), 1);
        assert_eq!(gen.current_len(), 6);
        assert!(!gen.is_finished());
        assert!(!RuntimeContext::new(gen.clone()).is_context);

        gen.advance();
        assert!(gen.is_finished());
    }
}
