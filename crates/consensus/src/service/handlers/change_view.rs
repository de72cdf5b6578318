use super::super::ConsensusService;
use crate::messages::ChangeView;
use std::time::Duration;
use tracing::info;

impl ConsensusService {
    /// Asks the other validators to move to the next view.
    pub fn request_change_view(&mut self) {
        let Some(index) = self.context.my_index else {
            return;
        };
        self.context.flags.view_changing = true;
        let expected = self.context.expected_view[index].saturating_add(1);
        self.context.expected_view[index] = expected;
        info!(
            block_index = self.context.block_index,
            view = self.context.view_number,
            new_view = expected,
            "request change view"
        );
        let seconds_per_block = self.chain.settings().seconds_per_block;
        self.change_timer(Duration::from_secs(
            seconds_per_block.saturating_mul(u64::from(expected) + 2),
        ));
        let payload = self.context.make_change_view();
        self.send_payload(payload);
        self.check_expected_view(expected);
    }

    /// Moves to `view` once `M` validators expect it.
    pub fn check_expected_view(&mut self, view: u16) {
        if self.context.view_number == view {
            return;
        }
        let agreeing = self
            .context
            .expected_view
            .iter()
            .filter(|expected| **expected == view)
            .count();
        if agreeing >= self.context.m() {
            self.initialize(view);
        }
    }

    pub(in crate::service) fn on_change_view(&mut self, index: usize, message: ChangeView) {
        let new_view = message.new_view_number();
        if new_view <= self.context.expected_view[index] {
            return;
        }
        info!(
            block_index = self.context.block_index,
            validator = index,
            new_view,
            "change view received"
        );
        self.context.expected_view[index] = new_view;
        self.check_expected_view(new_view);
    }
}
