use std::any::Any;
use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::search::node::{Problem, SearchNode, Solution};

/// A city on the plane. Instances keep cities arranged so that
/// `cities[i].id == i`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct City {
    pub x: i32,
    pub y: i32,
    pub id: i32,
}

impl City {
    pub fn new(x: i32, y: i32, id: i32) -> Self {
        Self { x, y, id }
    }

    pub fn dist(&self, other: &City) -> f64 {
        let dx = (self.x - other.x) as f64;
        let dy = (self.y - other.y) as f64;
        (dx * dx + dy * dy).sqrt()
    }
}

fn read_i32(bytes: &[u8], pos: &mut usize) -> Result<i32> {
    let end = *pos + 4;
    let slice = bytes
        .get(*pos..end)
        .ok_or_else(|| Error::Decode("truncated payload".to_string()))?;
    *pos = end;
    // SAFETY: the range above is exactly 4 bytes long
    Ok(i32::from_be_bytes(slice.try_into().expect("4-byte slice")))
}

fn write_i32(bytes: &mut Vec<u8>, value: i32) {
    bytes.extend_from_slice(&value.to_be_bytes());
}

/// A travelling-salesman instance.
///
/// Wire layout, fixed-width big-endian: `numCities:i32`, then for each city
/// in index order `x:i32, y:i32, id:i32`.
#[derive(Debug)]
pub struct TspProblem {
    cities: Vec<City>,
}

impl TspProblem {
    pub const TYPE_TAG: &'static str = "tsp";

    /// Cities must carry ids 0..n; they are stored sorted by id.
    pub fn new(mut cities: Vec<City>) -> Self {
        cities.sort_by_key(|c| c.id);
        debug_assert!(cities.iter().enumerate().all(|(i, c)| c.id == i as i32));
        Self { cities }
    }

    pub fn num_cities(&self) -> usize {
        self.cities.len()
    }

    pub fn cities(&self) -> &[City] {
        &self.cities
    }

    pub fn dist_between(&self, a: i32, b: i32) -> f64 {
        self.cities[a as usize].dist(&self.cities[b as usize])
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut pos = 0;
        let num_cities = read_i32(bytes, &mut pos)?;
        if num_cities < 0 {
            return Err(Error::Decode(format!("negative city count {}", num_cities)));
        }
        let mut cities = Vec::with_capacity(num_cities as usize);
        for _ in 0..num_cities {
            let x = read_i32(bytes, &mut pos)?;
            let y = read_i32(bytes, &mut pos)?;
            let id = read_i32(bytes, &mut pos)?;
            cities.push(City::new(x, y, id));
        }
        cities.sort_by_key(|c| c.id);
        if cities.iter().enumerate().any(|(i, c)| c.id != i as i32) {
            return Err(Error::Decode("city ids are not 0..n".to_string()));
        }
        Ok(Self { cities })
    }
}

impl Problem for TspProblem {
    fn problem_type(&self) -> &'static str {
        Self::TYPE_TAG
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(4 + self.cities.len() * 12);
        write_i32(&mut bytes, self.cities.len() as i32);
        for city in &self.cities {
            write_i32(&mut bytes, city.x);
            write_i32(&mut bytes, city.y);
            write_i32(&mut bytes, city.id);
        }
        bytes
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A closed tour visiting every city once.
#[derive(Debug, Clone)]
pub struct TspSolution {
    pub tour: Vec<i32>,
    pub cost: f64,
}

impl Solution for TspSolution {
    fn cost(&self) -> f64 {
        self.cost
    }
}

impl fmt::Display for TspSolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tour {:?} cost {:.3}", self.tour, self.cost)
    }
}

/// A partial tour rooting one subtree of the search.
///
/// Wire payload: `tourLen:i32` followed by the visited city ids in order,
/// each a big-endian i32. The path cost is recomputed on arrival from the
/// problem instance already resident on the receiving side.
#[derive(Debug)]
pub struct TspNode {
    tour: Vec<i32>,
    cost_so_far: f64,
    /// Lower bound after evaluation; the closed-tour cost for solutions.
    bound: f64,
    evaluated: bool,
    solution: Option<TspSolution>,
    children: VecDeque<TspNode>,
}

impl TspNode {
    pub const TYPE_TAG: &'static str = "tsp";

    /// The search root: a tour pinned to start at city 0.
    pub fn root() -> Self {
        Self::with_tour(vec![0], 0.0)
    }

    fn with_tour(tour: Vec<i32>, cost_so_far: f64) -> Self {
        Self {
            tour,
            cost_so_far,
            bound: cost_so_far,
            evaluated: false,
            solution: None,
            children: VecDeque::new(),
        }
    }

    pub fn tour(&self) -> &[i32] {
        &self.tour
    }

    pub fn depth(&self) -> usize {
        self.tour.len()
    }

    pub fn from_bytes(bytes: &[u8], problem: &TspProblem) -> Result<Self> {
        let mut pos = 0;
        let len = read_i32(bytes, &mut pos)?;
        let n = problem.num_cities() as i32;
        if len < 1 || len > n {
            return Err(Error::Decode(format!("bad tour length {}", len)));
        }
        let mut tour = Vec::with_capacity(len as usize);
        let mut seen = vec![false; n as usize];
        for _ in 0..len {
            let id = read_i32(bytes, &mut pos)?;
            if id < 0 || id >= n {
                return Err(Error::Decode(format!("city id {} out of range", id)));
            }
            if seen[id as usize] {
                return Err(Error::Decode(format!("city {} repeated in tour", id)));
            }
            seen[id as usize] = true;
            tour.push(id);
        }
        let cost_so_far = tour
            .windows(2)
            .map(|pair| problem.dist_between(pair[0], pair[1]))
            .sum();
        Ok(Self::with_tour(tour, cost_so_far))
    }

    fn unvisited(&self, n: usize) -> Vec<i32> {
        let mut visited = vec![false; n];
        for &id in &self.tour {
            visited[id as usize] = true;
        }
        (0..n as i32).filter(|&id| !visited[id as usize]).collect()
    }

    /// Admissible lower bound on any completion of this partial tour: the
    /// path so far, plus the cheapest edge from the path's end into the
    /// remaining cities, plus for each remaining city the cheapest edge
    /// leaving it toward another remaining city or back to the start.
    fn lower_bound(&self, problem: &TspProblem, unvisited: &[i32]) -> f64 {
        let start = self.tour[0];
        let last = self.tour[self.tour.len() - 1];
        let mut bound = self.cost_so_far;

        bound += unvisited
            .iter()
            .map(|&c| problem.dist_between(last, c))
            .fold(f64::INFINITY, f64::min);

        for &c in unvisited {
            let cheapest = unvisited
                .iter()
                .filter(|&&other| other != c)
                .map(|&other| problem.dist_between(c, other))
                .chain(std::iter::once(problem.dist_between(c, start)))
                .fold(f64::INFINITY, f64::min);
            bound += cheapest;
        }
        bound
    }
}

impl SearchNode for TspNode {
    fn node_type(&self) -> &'static str {
        Self::TYPE_TAG
    }

    fn evaluate(&mut self, problem: &dyn Problem, bound: f64) {
        if self.evaluated {
            return;
        }
        self.evaluated = true;

        let Some(problem) = problem.as_any().downcast_ref::<TspProblem>() else {
            tracing::error!(
                problem_type = problem.problem_type(),
                "Problem type mismatch evaluating tsp node, dropping it"
            );
            return;
        };

        let n = problem.num_cities();
        if self.tour.len() == n {
            let total = self.cost_so_far + problem.dist_between(self.tour[n - 1], self.tour[0]);
            self.bound = total;
            if total < bound {
                self.solution = Some(TspSolution {
                    tour: self.tour.clone(),
                    cost: total,
                });
            }
            return;
        }

        let unvisited = self.unvisited(n);
        self.bound = self.lower_bound(problem, &unvisited);
        if self.bound >= bound {
            // pruned
            return;
        }

        let last = self.tour[self.tour.len() - 1];
        let mut next: Vec<(f64, i32)> = unvisited
            .iter()
            .map(|&c| (problem.dist_between(last, c), c))
            .collect();
        // nearest city first: the preference order a depth-first worker follows
        next.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

        self.children = next
            .into_iter()
            .map(|(step, c)| {
                let mut tour = self.tour.clone();
                tour.push(c);
                Self::with_tour(tour, self.cost_so_far + step)
            })
            .collect();
    }

    fn is_evaluated(&self) -> bool {
        self.evaluated
    }

    fn has_next_child(&self) -> bool {
        !self.children.is_empty()
    }

    fn next_child(&mut self) -> Option<Box<dyn SearchNode>> {
        self.children
            .pop_front()
            .map(|child| Box::new(child) as Box<dyn SearchNode>)
    }

    fn is_solution(&self) -> bool {
        self.solution.is_some()
    }

    fn cost(&self) -> f64 {
        match &self.solution {
            Some(solution) => solution.cost,
            None => self.bound,
        }
    }

    fn solution(&self) -> Option<Box<dyn Solution>> {
        self.solution
            .clone()
            .map(|s| Box::new(s) as Box<dyn Solution>)
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(4 + self.tour.len() * 4);
        write_i32(&mut bytes, self.tour.len() as i32);
        for &id in &self.tour {
            write_i32(&mut bytes, id);
        }
        bytes
    }
}
