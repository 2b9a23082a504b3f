//! Conversation buffer invariants over long append sequences.

use std::time::SystemTime;

use colloquy_engine::colloquy_context::ConversationBuffer;
use colloquy_engine::colloquy_types::{Message, MessageId};
use colloquy_engine::{CompletionSettings, ModelRegistry, Role};

fn buffer(budget: u32, system_tokens: u32) -> ConversationBuffer {
    let config = ModelRegistry::new()
        .session_config(&CompletionSettings {
            model_max_tokens: Some(budget),
            ..CompletionSettings::default()
        })
        .unwrap();
    let system = Message::new(Role::System, "system", system_tokens, SystemTime::now());
    ConversationBuffer::new(system, &config).unwrap()
}

/// Deterministic token sizes in `1..=max`, with every 37th at `2 * max`.
fn sizes(count: usize, max: u32) -> Vec<u32> {
    let mut state: u32 = 0x9e37_79b9;
    (0..count)
        .map(|i| {
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            if i % 37 == 36 { max * 2 } else { state % max + 1 }
        })
        .collect()
}

#[test]
fn invariants_hold_after_every_append() {
    let budget = 50;
    let mut buffer = buffer(budget, 10);
    let mut appended: Vec<MessageId> = vec![buffer.active()[0].id()];

    for (i, tokens) in sizes(300, 30).into_iter().enumerate() {
        let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
        let message = Message::new(role, format!("m{i}"), tokens, SystemTime::now());
        appended.push(message.id());
        let evicted_before = buffer.evicted().len();

        let evicted_now = buffer.append(message);

        let sum: u64 = buffer
            .active()
            .iter()
            .map(|m| u64::from(m.token_count()))
            .sum();
        assert_eq!(buffer.token_usage(), sum, "usage drifted at append {i}");
        if tokens <= budget {
            assert!(buffer.token_usage() <= u64::from(budget), "over budget at {i}");
        } else {
            assert_eq!(buffer.len(), 1, "oversized message not alone at {i}");
        }
        assert_eq!(buffer.evicted().len(), evicted_before + evicted_now);
        assert_eq!(buffer.active().last().map(Message::token_count), Some(tokens));

        let order: Vec<MessageId> = buffer
            .evicted()
            .iter()
            .chain(buffer.active())
            .map(Message::id)
            .collect();
        assert_eq!(order, appended, "ordering broken at {i}");
    }
}

#[test]
fn system_message_is_evicted_like_any_other() {
    let mut buffer = buffer(50, 10);
    buffer.append(Message::new(Role::User, "u", 20, SystemTime::now()));
    assert_eq!(buffer.token_usage(), 30);
    assert!(buffer.evicted().is_empty());

    assert_eq!(
        buffer.append(Message::new(Role::Assistant, "a", 25, SystemTime::now())),
        1
    );
    let roles: Vec<Role> = buffer.active().iter().map(Message::role).collect();
    assert_eq!(roles, [Role::User, Role::Assistant]);
    assert_eq!(buffer.token_usage(), 45);
    assert_eq!(buffer.evicted()[0].role(), Role::System);
}
