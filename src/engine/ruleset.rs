//! Compiled rule sets and their factory.

use super::directives::{parse_directive_set, EngineConfig};
use super::error::EngineResult;
use super::transaction::EngineTransaction;
use super::{EngineSettings, Transaction, Waf, WafFactory};
use std::cell::Cell;
use std::rc::Rc;

/// State shared between a compiled rule set and its transactions.
pub(super) struct RuleSetCore {
    pub(super) config: EngineConfig,
    pub(super) settings: EngineSettings,
    next_transaction: Cell<u64>,
}

/// One directive set compiled into an executable engine. Immutable after
/// construction; transactions borrow it through a shared handle.
pub struct CompiledRuleSet {
    core: Rc<RuleSetCore>,
}

impl Waf for CompiledRuleSet {
    fn new_transaction(&self) -> Box<dyn Transaction> {
        let sequence = self.core.next_transaction.get() + 1;
        self.core.next_transaction.set(sequence);
        Box::new(EngineTransaction::new(
            Rc::clone(&self.core),
            format!("tx-{}", sequence),
        ))
    }
}

/// Compiles directive sets into [`CompiledRuleSet`] engines.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectiveFactory;

impl WafFactory for DirectiveFactory {
    fn compile(
        &self,
        directives: &[String],
        settings: &EngineSettings,
    ) -> EngineResult<Rc<dyn Waf>> {
        let config = parse_directive_set(directives)?;
        Ok(Rc::new(CompiledRuleSet {
            core: Rc::new(RuleSetCore {
                config,
                settings: settings.clone(),
                next_transaction: Cell::new(0),
            }),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_ids_are_sequential() {
        let waf = DirectiveFactory
            .compile(&["SecRuleEngine On".to_string()], &EngineSettings::default())
            .unwrap();

        let first = waf.new_transaction();
        let second = waf.new_transaction();
        assert_eq!(first.id(), "tx-1");
        assert_eq!(second.id(), "tx-2");
    }

    #[test]
    fn test_compile_error_propagates() {
        let result = DirectiveFactory.compile(
            &["SecBogusDirective On".to_string()],
            &EngineSettings::default(),
        );
        assert!(result.is_err());
    }
}
