//! Item catalog and the Prep-phase offer/selection cycle.

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use sim_core::{EffectKind, ItemConfig, PlayerId};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ItemError {
    #[error("item selection is closed")]
    SelectionClosed,
    #[error("player {0} has no pending offer")]
    NoOffer(PlayerId),
    #[error("player {0} already selected an item")]
    AlreadySelected(PlayerId),
    #[error("item {item} was not offered to player {player}")]
    NotOffered { player: PlayerId, item: String },
    #[error("duplicate item id: {0}")]
    DuplicateId(String),
    #[error("catalog needs at least {needed} items, has {available}")]
    CatalogTooSmall { needed: usize, available: usize },
    #[error("catalog parse error: {0}")]
    Parse(String),
    #[error("catalog io error: {0}")]
    Io(String),
}

/// One selectable item.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemOption {
    pub id: String,
    pub name: String,
    pub description: String,
    pub effect: EffectKind,
    /// Percent for bonus capital, HP for heal, otherwise a magnitude.
    pub value: i64,
}

impl ItemOption {
    fn new(id: &str, name: &str, description: &str, effect: EffectKind, value: i64) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            effect,
            value,
        }
    }
}

/// Catalog entry as written in YAML; the effect is resolved leniently.
#[derive(Debug, Deserialize)]
struct RawItem {
    id: String,
    name: String,
    #[serde(default)]
    description: String,
    effect: String,
    #[serde(default)]
    value: i64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ItemCatalog {
    items: Vec<ItemOption>,
}

impl ItemCatalog {
    /// The fourteen stock items.
    pub fn builtin() -> Self {
        use EffectKind::*;
        let items = vec![
            ItemOption::new("hp_bonus", "Second Wind", "Sell bonus proportional to lost HP", HpLossBonus, 100),
            ItemOption::new("triple", "Many Baskets", "Sell bonus while holding three or more symbols", Diversification, 100),
            ItemOption::new("low_stack", "Dead Cat Bounce", "Buying under your average cost builds a stack; three stacks pay a sell bonus", BuyLowStack, 100),
            ItemOption::new("money", "Full Magazine", "Starting capital +10% every round", BonusCapital, 10),
            ItemOption::new("stay", "Value Investor", "Sell bonus after holding for a while", LongHold, 100),
            ItemOption::new("dividend", "Golden Goose", "Periodic dividend on invested capital while holding", Dividend, 100),
            ItemOption::new("high_stack", "Ride the Horse", "Buying over your average cost pays a bonus on the next sell", BuyHighStack, 100),
            ItemOption::new("deficit", "Bear Market", "Sell bonus when selling under cost", LossSale, 100),
            ItemOption::new("short_sell", "Scalper", "Sell bonus when selling soon after buying", ShortHold, 100),
            ItemOption::new("time_bonus", "Closing Bell", "Sell bonus near the end of the round", ClosingBell, 100),
            ItemOption::new("health", "Steady Nerves", "Restore 25 HP", Heal, 25),
            ItemOption::new("player_bonus", "Zero Sum", "Sell bonus grows as players drop out", Scarcity, 100),
            ItemOption::new("no_buy_discount", "Patience Pays", "Next buy costs 10% less", SkipBuyDiscount, 10),
            ItemOption::new("reverse_trade", "Mind the Thorns", "+35% selling under cost, -15% selling above", ReverseTrade, 5),
        ];
        Self { items }
    }

    /// Parse a YAML list of items.
    ///
    /// Entries naming an unknown effect are skipped with a warning.
    pub fn from_yaml_str(text: &str) -> Result<Self, ItemError> {
        let raw: Vec<RawItem> =
            serde_yaml::from_str(text).map_err(|e| ItemError::Parse(e.to_string()))?;
        let mut seen = BTreeSet::new();
        let mut items = Vec::with_capacity(raw.len());
        for r in raw {
            let effect = match r.effect.parse::<EffectKind>() {
                Ok(k) => k,
                Err(err) => {
                    warn!(item = %r.id, %err, "skipping item with unknown effect");
                    continue;
                }
            };
            if !seen.insert(r.id.clone()) {
                return Err(ItemError::DuplicateId(r.id));
            }
            items.push(ItemOption {
                id: r.id,
                name: r.name,
                description: r.description,
                effect,
                value: r.value,
            });
        }
        Ok(Self { items })
    }

    /// Read and parse a YAML catalog file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ItemError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ItemError::Io(format!("{}: {e}", path.display())))?;
        let catalog = Self::from_yaml_str(&text)?;
        info!(path = %path.display(), items = catalog.len(), "item catalog loaded");
        Ok(catalog)
    }

    /// The catalog named by `items.catalog_path`, or the built-in one.
    pub fn from_config(cfg: &ItemConfig) -> Result<Self, ItemError> {
        match &cfg.catalog_path {
            Some(path) => Self::load(path),
            None => Ok(Self::builtin()),
        }
    }

    pub fn items(&self) -> &[ItemOption] {
        &self.items
    }

    pub fn get(&self, id: &str) -> Option<&ItemOption> {
        self.items.iter().find(|i| i.id == id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[derive(Clone, Debug)]
struct PendingOffer {
    options: Vec<ItemOption>,
    selected: bool,
}

/// Hands out per-player offers and tracks what each player has seen.
#[derive(Debug)]
pub struct ItemDistributor {
    catalog: ItemCatalog,
    per_player: usize,
    max_distributions: u32,
    distributions: u32,
    seed: u64,
    rng: ChaCha8Rng,
    offered: BTreeMap<PlayerId, BTreeSet<String>>,
    pending: BTreeMap<PlayerId, PendingOffer>,
}

impl ItemDistributor {
    pub fn new(catalog: ItemCatalog, cfg: &ItemConfig) -> Result<Self, ItemError> {
        if catalog.len() < cfg.offers_per_player {
            return Err(ItemError::CatalogTooSmall {
                needed: cfg.offers_per_player,
                available: catalog.len(),
            });
        }
        Ok(Self {
            catalog,
            per_player: cfg.offers_per_player,
            max_distributions: cfg.distribution_rounds,
            distributions: 0,
            seed: cfg.rng_seed,
            rng: ChaCha8Rng::seed_from_u64(cfg.rng_seed),
            offered: BTreeMap::new(),
            pending: BTreeMap::new(),
        })
    }

    pub fn catalog(&self) -> &ItemCatalog {
        &self.catalog
    }

    pub fn distributions(&self) -> u32 {
        self.distributions
    }

    /// Offer items to `players` after `round`.
    ///
    /// Only rounds `1..=distribution_rounds` distribute, at most that many
    /// times per game. Each player gets options they have not been offered
    /// before; their history resets when too few unseen items remain.
    pub fn distribute(&mut self, round: u32, players: &[PlayerId]) -> Vec<(PlayerId, Vec<ItemOption>)> {
        if round == 0 || round > self.max_distributions || self.distributions >= self.max_distributions {
            debug!(round, "no item distribution this round");
            return Vec::new();
        }
        self.distributions += 1;
        self.pending.clear();
        let mut out = Vec::with_capacity(players.len());
        for &player in players {
            let options = self.draw(player);
            self.pending.insert(
                player,
                PendingOffer {
                    options: options.clone(),
                    selected: false,
                },
            );
            out.push((player, options));
        }
        info!(round, players = out.len(), n = self.distributions, "items offered");
        out
    }

    fn draw(&mut self, player: PlayerId) -> Vec<ItemOption> {
        let seen = self.offered.entry(player).or_default();
        let mut pool: Vec<&ItemOption> = self
            .catalog
            .items
            .iter()
            .filter(|i| !seen.contains(&i.id))
            .collect();
        if pool.len() < self.per_player {
            debug!(%player, "offer pool exhausted; resetting");
            seen.clear();
            pool = self.catalog.items.iter().collect();
        }
        let picks: Vec<ItemOption> = pool
            .choose_multiple(&mut self.rng, self.per_player)
            .map(|i| (*i).clone())
            .collect();
        for p in &picks {
            seen.insert(p.id.clone());
        }
        picks
    }

    /// Current offer of a player, if one is open.
    pub fn offer(&self, player: PlayerId) -> Option<&[ItemOption]> {
        self.pending.get(&player).map(|p| p.options.as_slice())
    }

    /// Accept a player's choice from their open offer.
    pub fn select(&mut self, player: PlayerId, item_id: &str) -> Result<ItemOption, ItemError> {
        let offer = self
            .pending
            .get_mut(&player)
            .ok_or(ItemError::NoOffer(player))?;
        if offer.selected {
            return Err(ItemError::AlreadySelected(player));
        }
        let item = offer
            .options
            .iter()
            .find(|i| i.id == item_id)
            .cloned()
            .ok_or_else(|| ItemError::NotOffered {
                player,
                item: item_id.to_string(),
            })?;
        offer.selected = true;
        Ok(item)
    }

    /// Pick a random option for every player who did not choose, then close
    /// the window.
    pub fn auto_select(&mut self) -> Vec<(PlayerId, ItemOption)> {
        let mut out = Vec::new();
        for (player, offer) in std::mem::take(&mut self.pending) {
            if offer.selected || offer.options.is_empty() {
                continue;
            }
            let idx = self.rng.gen_range(0..offer.options.len());
            out.push((player, offer.options[idx].clone()));
        }
        out
    }

    /// Drop a departed player's state.
    pub fn forget(&mut self, player: PlayerId) {
        self.pending.remove(&player);
        self.offered.remove(&player);
    }

    /// Start over as for a new game.
    pub fn reset(&mut self) {
        self.distributions = 0;
        self.pending.clear();
        self.offered.clear();
        self.rng = ChaCha8Rng::seed_from_u64(self.seed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn distributor() -> ItemDistributor {
        ItemDistributor::new(ItemCatalog::builtin(), &ItemConfig::default()).unwrap()
    }

    #[test]
    fn builtin_catalog_covers_every_effect_once() {
        let c = ItemCatalog::builtin();
        assert_eq!(c.len(), 14);
        let kinds: BTreeSet<_> = c.items().iter().map(|i| i.effect).collect();
        assert_eq!(kinds.len(), 14);
        assert_eq!(c.get("health").map(|i| i.value), Some(25));
    }

    #[test]
    fn offers_do_not_repeat_until_pool_runs_dry() {
        let mut d = distributor();
        let p = PlayerId(1);
        let mut seen = BTreeSet::new();
        for round in 1..=3 {
            let offers = d.distribute(round, &[p]);
            assert_eq!(offers.len(), 1);
            assert_eq!(offers[0].1.len(), 3);
            for o in &offers[0].1 {
                assert!(seen.insert(o.id.clone()), "{} offered twice", o.id);
            }
        }
        assert!(d.distribute(4, &[p]).is_empty());
        assert_eq!(d.distributions(), 3);
    }

    #[test]
    fn pool_resets_when_too_small() {
        let cfg = ItemConfig {
            distribution_rounds: 10,
            ..ItemConfig::default()
        };
        let mut d = ItemDistributor::new(ItemCatalog::builtin(), &cfg).unwrap();
        let p = PlayerId(1);
        let mut seen = BTreeSet::new();
        for round in 1..=4 {
            let offers = d.distribute(round, &[p]).remove(0).1;
            assert_eq!(offers.len(), 3);
            for o in offers {
                assert!(seen.insert(o.id), "repeat before the pool ran dry");
            }
        }
        // 14 items: four draws leave two unseen, so the fifth draws from all.
        let fifth = d.distribute(5, &[p]).remove(0).1;
        assert_eq!(fifth.len(), 3);
        let unseen = fifth.iter().filter(|o| !seen.contains(&o.id)).count();
        assert!(unseen <= 2);
        assert!(fifth.iter().any(|o| seen.contains(&o.id)));
    }

    #[test]
    fn select_then_auto_select_the_rest() {
        let mut d = distributor();
        let offers = d.distribute(1, &[PlayerId(1), PlayerId(2)]);
        let pick = offers[0].1[1].id.clone();
        assert_eq!(d.select(PlayerId(1), &pick).unwrap().id, pick);
        assert_eq!(d.select(PlayerId(1), &pick), Err(ItemError::AlreadySelected(PlayerId(1))));
        assert!(matches!(
            d.select(PlayerId(2), "nope"),
            Err(ItemError::NotOffered { .. })
        ));
        assert_eq!(d.select(PlayerId(3), &pick), Err(ItemError::NoOffer(PlayerId(3))));

        let auto = d.auto_select();
        assert_eq!(auto.len(), 1);
        assert_eq!(auto[0].0, PlayerId(2));
        assert!(offers[1].1.contains(&auto[0].1));
        assert!(d.auto_select().is_empty());
        assert!(d.offer(PlayerId(2)).is_none());
    }

    #[test]
    fn yaml_catalog_skips_unknown_effects() {
        let text = r#"
- id: a
  name: A
  effect: loss_sale
  value: 100
- id: b
  name: B
  effect: moon_shot
- id: c
  name: C
  effect: heal
  value: 10
"#;
        let c = ItemCatalog::from_yaml_str(text).unwrap();
        assert_eq!(c.len(), 2);
        assert_eq!(c.get("c").unwrap().effect, EffectKind::Heal);
        assert!(matches!(
            ItemCatalog::from_yaml_str("- id: a\n  name: A\n  effect: heal\n- id: a\n  name: B\n  effect: heal\n"),
            Err(ItemError::DuplicateId(_))
        ));
        let small = ItemCatalog::from_yaml_str(text).unwrap();
        assert!(matches!(
            ItemDistributor::new(small, &ItemConfig::default()),
            Err(ItemError::CatalogTooSmall { needed: 3, available: 2 })
        ));
    }

    #[test]
    fn catalog_file_drives_the_offers() {
        let text = r#"
- id: lucky
  name: Lucky
  effect: heal
  value: 5
- id: patient
  name: Patient
  effect: long_hold
  value: 100
- id: greedy
  name: Greedy
  effect: loss_sale
  value: 100
"#;
        let path = std::env::temp_dir().join(format!("item-catalog-{}.yaml", std::process::id()));
        std::fs::write(&path, text).unwrap();
        let cfg = ItemConfig {
            catalog_path: Some(path.display().to_string()),
            ..ItemConfig::default()
        };
        let catalog = ItemCatalog::from_config(&cfg).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(catalog.len(), 3);

        let mut d = ItemDistributor::new(catalog, &cfg).unwrap();
        let mut ids: Vec<String> = d.draw(PlayerId(1)).into_iter().map(|o| o.id).collect();
        ids.sort();
        assert_eq!(ids, vec!["greedy", "lucky", "patient"]);

        assert_eq!(ItemCatalog::from_config(&ItemConfig::default()).unwrap(), ItemCatalog::builtin());
        let missing = ItemConfig {
            catalog_path: Some("/nonexistent/items.yaml".into()),
            ..ItemConfig::default()
        };
        assert!(matches!(ItemCatalog::from_config(&missing), Err(ItemError::Io(_))));
    }

    #[test]
    fn reset_replays_the_same_offers() {
        let mut d = distributor();
        let first = d.distribute(1, &[PlayerId(1)]);
        d.reset();
        assert_eq!(d.distribute(1, &[PlayerId(1)]), first);
    }
}
