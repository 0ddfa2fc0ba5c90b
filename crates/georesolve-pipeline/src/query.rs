//! Read-only traversal of the market hierarchy.
//!
//! Every walk is bounded by `max_depth` hops and never revisits a market on
//! the same path, so a cycle in the stored edges ends a path instead of
//! looping.

use std::collections::{HashMap, HashSet};

use georesolve_core::{
  geography::GeoLevel,
  hierarchy::HierarchyEdge,
  market::Market,
  store::GeoStore,
};

use crate::{Error, Pipeline, Result};

/// Memoised store reads for one traversal.
struct Lookup<'s, S> {
  store:   &'s S,
  markets: HashMap<String, Option<Market>>,
  parents: HashMap<String, Vec<HierarchyEdge>>,
}

impl<'s, S: GeoStore> Lookup<'s, S> {
  fn new(store: &'s S) -> Self { Self { store, markets: HashMap::new(), parents: HashMap::new() } }

  async fn market(&mut self, region_id: &str) -> Result<Option<Market>> {
    if let Some(hit) = self.markets.get(region_id) {
      return Ok(hit.clone());
    }
    let market = self.store.get_market(region_id).await.map_err(Error::store)?;
    self.markets.insert(region_id.to_owned(), market.clone());
    Ok(market)
  }

  async fn parents(&mut self, region_id: &str) -> Result<&[HierarchyEdge]> {
    if !self.parents.contains_key(region_id) {
      let edges = self.store.parents_of(region_id).await.map_err(Error::store)?;
      self.parents.insert(region_id.to_owned(), edges);
    }
    Ok(self.parents.get(region_id).map(Vec::as_slice).unwrap_or_default())
  }
}

fn at_level(
  edges: Vec<HierarchyEdge>,
  level: Option<GeoLevel>,
  pick: impl Fn(&HierarchyEdge) -> GeoLevel,
) -> Vec<HierarchyEdge> {
  match level {
    Some(level) => edges.into_iter().filter(|e| pick(e) == level).collect(),
    None => edges,
  }
}

/// The primary parent to follow from a market: the finest parent level wins,
/// then the smallest parent id.
fn next_primary<'e>(edges: &'e [HierarchyEdge], visited: &HashSet<String>) -> Option<&'e HierarchyEdge> {
  edges
    .iter()
    .filter(|e| e.is_primary && !visited.contains(&e.parent_region_id))
    .min_by(|a, b| {
      b.parent_level
        .rank()
        .cmp(&a.parent_level.rank())
        .then_with(|| a.parent_region_id.cmp(&b.parent_region_id))
    })
}

impl<S: GeoStore + 'static> Pipeline<S> {
  /// Markets directly inside `region_id`, optionally only those at `level`,
  /// in id order.
  pub async fn children(&self, region_id: &str, level: Option<GeoLevel>) -> Result<Vec<Market>> {
    let edges = self.children_edges(region_id, level).await?;
    self.markets_in_order(edges.iter().map(|e| e.child_region_id.as_str())).await
  }

  /// Markets directly containing `region_id`, optionally only those at
  /// `level`, in id order.
  pub async fn parents(&self, region_id: &str, level: Option<GeoLevel>) -> Result<Vec<Market>> {
    let edges = self.parents_edges(region_id, level).await?;
    self.markets_in_order(edges.iter().map(|e| e.parent_region_id.as_str())).await
  }

  /// Edges where `region_id` is the parent, with overlap and origin.
  pub async fn children_edges(
    &self,
    region_id: &str,
    level: Option<GeoLevel>,
  ) -> Result<Vec<HierarchyEdge>> {
    let edges = self.store.children_of(region_id).await.map_err(Error::store)?;
    Ok(at_level(edges, level, |e| e.child_level))
  }

  /// Edges where `region_id` is the child, with overlap and origin.
  pub async fn parents_edges(
    &self,
    region_id: &str,
    level: Option<GeoLevel>,
  ) -> Result<Vec<HierarchyEdge>> {
    let edges = self.store.parents_of(region_id).await.map_err(Error::store)?;
    Ok(at_level(edges, level, |e| e.parent_level))
  }

  async fn markets_in_order(&self, ids: impl Iterator<Item = &str>) -> Result<Vec<Market>> {
    let mut lookup = Lookup::new(&*self.store);
    let mut markets = Vec::new();
    for id in ids {
      if let Some(market) = lookup.market(id).await? {
        markets.push(market);
      }
    }
    Ok(markets)
  }

  /// The market followed by its primary ancestors, child to root.
  ///
  /// Empty when the market is unknown.
  pub async fn primary_chain(&self, region_id: &str) -> Result<Vec<Market>> {
    let mut lookup = Lookup::new(&*self.store);
    let Some(start) = lookup.market(region_id).await? else {
      return Ok(Vec::new());
    };

    let mut visited = HashSet::from([start.region_id.clone()]);
    let mut chain = vec![start];
    while chain.len() <= self.config.max_depth {
      let Some(tip) = chain.last().map(|m| m.region_id.clone()) else { break };
      let edges = lookup.parents(&tip).await?;
      let Some(next) = next_primary(edges, &visited).map(|e| e.parent_region_id.clone()) else {
        break;
      };
      let Some(parent) = lookup.market(&next).await? else { break };
      visited.insert(next);
      chain.push(parent);
    }
    Ok(chain)
  }

  /// Every ancestor chain from the market to a root, over all edges.
  ///
  /// Each path starts with the market itself. A path ends at a market with no
  /// parents, at the hop limit, or where every parent is already on the path.
  /// Paths come out in parent-id order.
  pub async fn full_path(&self, region_id: &str) -> Result<Vec<Vec<Market>>> {
    let mut lookup = Lookup::new(&*self.store);
    if lookup.market(region_id).await?.is_none() {
      return Ok(Vec::new());
    }

    let mut finished: Vec<Vec<String>> = Vec::new();
    let mut stack = vec![vec![region_id.to_owned()]];
    while let Some(path) = stack.pop() {
      let Some(tip) = path.last() else { continue };
      let next: Vec<String> = if path.len() > self.config.max_depth {
        Vec::new()
      } else {
        lookup
          .parents(tip)
          .await?
          .iter()
          .filter(|e| !path.contains(&e.parent_region_id))
          .map(|e| e.parent_region_id.clone())
          .collect()
      };

      if next.is_empty() {
        finished.push(path);
        continue;
      }
      for parent in next.into_iter().rev() {
        let mut longer = path.clone();
        longer.push(parent);
        stack.push(longer);
      }
    }

    let mut paths = Vec::with_capacity(finished.len());
    for ids in finished {
      let mut path = Vec::with_capacity(ids.len());
      for id in &ids {
        if let Some(market) = lookup.market(id).await? {
          path.push(market);
        }
      }
      paths.push(path);
    }
    Ok(paths)
  }
}
