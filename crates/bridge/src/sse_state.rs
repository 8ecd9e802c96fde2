//! The block-lifecycle state machine shared by the Anthropic emitter and the OpenAI
//! projector: tracks which content blocks are open, allocates block indices, and maps
//! tool-use ids to their block index.
//!
//! Index 0 is reserved for the text block (opened lazily on first text delta); tool-use
//! blocks are assigned indices starting at 1 in upstream arrival order, uniformly, whether or
//! not a text block ever opens.

use std::collections::{HashMap, HashSet};

use crate::event::ToolInputFragment;

/// One instruction to render as a client-facing content-block event.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockAction {
    OpenText {
        index: u32,
    },
    TextDelta {
        index: u32,
        text: String,
    },
    OpenToolUse {
        index: u32,
        tool_use_id: String,
        name: String,
    },
    ToolInputDelta {
        index: u32,
        partial_json: String,
    },
    CloseBlock {
        index: u32,
    },
}

#[derive(Debug, Default)]
struct BlockState {
    stopped: bool,
}

/// Tracks open/closed content blocks and tool-use id/index bookkeeping for one stream.
#[derive(Debug, Default)]
pub struct SseStateMachine {
    text_block_open: bool,
    active_blocks: HashMap<u32, BlockState>,
    block_index_by_tool_use_id: HashMap<String, u32>,
    completed_tool_use_ids: HashSet<String>,
    next_tool_index: u32,
}

impl SseStateMachine {
    pub fn new() -> Self {
        Self {
            next_tool_index: 1,
            ..Default::default()
        }
    }

    /// Handles a `text_delta` upstream event, opening the implicit text block first if needed.
    pub fn on_text_delta(&mut self, content: &str) -> Vec<BlockAction> {
        let mut actions = Vec::new();

        if !self.text_block_open {
            self.text_block_open = true;
            self.active_blocks.insert(0, BlockState::default());
            actions.push(BlockAction::OpenText { index: 0 });
        }

        actions.push(BlockAction::TextDelta {
            index: 0,
            text: content.to_string(),
        });

        actions
    }

    /// Handles a `tool_use_start` event, optionally fused with an initial input fragment.
    pub fn on_tool_use_start(
        &mut self,
        tool_use_id: &str,
        name: &str,
        input_fragment: Option<ToolInputFragment>,
    ) -> Vec<BlockAction> {
        let mut actions = self.open_tool_block(tool_use_id, name);

        if let Some(fragment) = input_fragment {
            actions.extend(self.render_fragment(tool_use_id, fragment));
        }

        actions
    }

    /// Handles a `tool_use_delta` event, synthesising the block start first if the upstream
    /// sent a delta before any start for this id (a documented edge case).
    pub fn on_tool_use_delta(&mut self, tool_use_id: &str, fragment: ToolInputFragment) -> Vec<BlockAction> {
        let mut actions = Vec::new();

        if !self.block_index_by_tool_use_id.contains_key(tool_use_id) {
            actions.extend(self.open_tool_block(tool_use_id, ""));
        }

        actions.extend(self.render_fragment(tool_use_id, fragment));
        actions
    }

    /// Handles a `tool_use_stop` event: records completion then closes the block.
    pub fn on_tool_use_stop(&mut self, tool_use_id: &str) -> Vec<BlockAction> {
        let Some(&index) = self.block_index_by_tool_use_id.get(tool_use_id) else {
            return Vec::new();
        };

        self.completed_tool_use_ids.insert(tool_use_id.to_string());
        self.block_index_by_tool_use_id.remove(tool_use_id);

        if let Some(block) = self.active_blocks.get_mut(&index) {
            block.stopped = true;
        }

        vec![BlockAction::CloseBlock { index }]
    }

    /// Synthesises a `content_block_stop` for every block still open, in ascending index
    /// order, for the end-of-stream edge case.
    pub fn close_all_open_blocks(&mut self) -> Vec<BlockAction> {
        let mut open_indices: Vec<u32> = self
            .active_blocks
            .iter()
            .filter(|(_, state)| !state.stopped)
            .map(|(index, _)| *index)
            .collect();
        open_indices.sort_unstable();

        for index in &open_indices {
            if let Some(state) = self.active_blocks.get_mut(index) {
                state.stopped = true;
            }
        }

        open_indices.into_iter().map(|index| BlockAction::CloseBlock { index }).collect()
    }

    pub fn has_active_tools(&self) -> bool {
        !self.block_index_by_tool_use_id.is_empty()
    }

    pub fn has_completed_tools(&self) -> bool {
        !self.completed_tool_use_ids.is_empty()
    }

    fn open_tool_block(&mut self, tool_use_id: &str, name: &str) -> Vec<BlockAction> {
        let index = self.next_tool_index;
        self.next_tool_index += 1;

        self.block_index_by_tool_use_id.insert(tool_use_id.to_string(), index);
        self.active_blocks.insert(index, BlockState::default());

        vec![BlockAction::OpenToolUse {
            index,
            tool_use_id: tool_use_id.to_string(),
            name: name.to_string(),
        }]
    }

    fn render_fragment(&self, tool_use_id: &str, fragment: ToolInputFragment) -> Vec<BlockAction> {
        let Some(&index) = self.block_index_by_tool_use_id.get(tool_use_id) else {
            return Vec::new();
        };

        let partial_json = match fragment {
            ToolInputFragment::Partial(s) => s,
            ToolInputFragment::Complete(value) => value.to_string(),
        };

        vec![BlockAction::ToolInputDelta { index, partial_json }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_block_opens_lazily_once() {
        let mut sm = SseStateMachine::new();
        let first = sm.on_text_delta("hi");
        assert_eq!(first[0], BlockAction::OpenText { index: 0 });
        let second = sm.on_text_delta(" there");
        assert_eq!(second, vec![BlockAction::TextDelta { index: 0, text: " there".to_string() }]);
    }

    #[test]
    fn tool_blocks_start_at_index_one() {
        let mut sm = SseStateMachine::new();
        let actions = sm.on_tool_use_start("t1", "get_weather", None);
        assert_eq!(
            actions,
            vec![BlockAction::OpenToolUse {
                index: 1,
                tool_use_id: "t1".to_string(),
                name: "get_weather".to_string()
            }]
        );
    }

    #[test]
    fn delta_before_start_synthesises_open() {
        let mut sm = SseStateMachine::new();
        let actions = sm.on_tool_use_delta("t1", ToolInputFragment::Partial("{\"a\":1}".to_string()));
        assert!(matches!(actions[0], BlockAction::OpenToolUse { index: 1, .. }));
        assert!(matches!(actions[1], BlockAction::ToolInputDelta { index: 1, .. }));
    }

    #[test]
    fn stop_then_close_marks_completed_and_active_empty() {
        let mut sm = SseStateMachine::new();
        sm.on_tool_use_start("t1", "get_weather", None);
        assert!(sm.has_active_tools());
        let actions = sm.on_tool_use_stop("t1");
        assert_eq!(actions, vec![BlockAction::CloseBlock { index: 1 }]);
        assert!(!sm.has_active_tools());
        assert!(sm.has_completed_tools());
    }

    #[test]
    fn close_all_open_blocks_is_ascending_and_idempotent() {
        let mut sm = SseStateMachine::new();
        sm.on_text_delta("hi");
        sm.on_tool_use_start("t1", "get_weather", None);
        sm.on_tool_use_start("t2", "get_time", None);

        let actions = sm.close_all_open_blocks();
        assert_eq!(
            actions,
            vec![
                BlockAction::CloseBlock { index: 0 },
                BlockAction::CloseBlock { index: 1 },
                BlockAction::CloseBlock { index: 2 },
            ]
        );

        assert!(sm.close_all_open_blocks().is_empty());
    }

    #[test]
    fn complete_fragment_is_stringified() {
        let mut sm = SseStateMachine::new();
        sm.on_tool_use_start("t1", "get_weather", None);
        let actions = sm.on_tool_use_delta("t1", ToolInputFragment::Complete(serde_json::json!({"city": "NYC"})));
        assert_eq!(
            actions,
            vec![BlockAction::ToolInputDelta {
                index: 1,
                partial_json: r#"{"city":"NYC"}"#.to_string()
            }]
        );
    }
}
