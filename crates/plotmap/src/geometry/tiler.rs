use std::collections::{HashMap, HashSet, VecDeque};

use tracing::warn;

/// One unit cell in the plot grid, in cell coordinates (not blocks).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GridPos {
    pub x: i32,
    pub z: i32,
}

impl GridPos {
    pub fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }
}

/// World-space extent of one grid cell along each axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellSize {
    pub x: f64,
    pub z: f64,
}

impl CellSize {
    pub fn new(x: f64, z: f64) -> Self {
        Self { x, z }
    }

    pub fn square(edge: f64) -> Self {
        Self { x: edge, z: edge }
    }
}

/// A simple polygon with zero or more holes, in world coordinates.
/// The outline winds clockwise when x points east and z points south; holes
/// wind the opposite way.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub outline: Vec<[f64; 2]>,
    pub holes: Vec<Vec<[f64; 2]>>,
}

/// Converts a set of grid cells into the minimal polygons-with-holes that
/// exactly cover it.
///
/// Conventions (these are load-bearing for every consumer):
/// - Cells are connected through shared edges only; diagonal contact does not
///   join components, and each connected component is tiled on its own.
/// - Boundary edges are directed so the filled area lies to the right of the
///   walk; where four boundary edges meet at one corner, the trace takes the
///   sharpest left turn, so every loop bounds exactly one connected empty
///   region.
/// - Loops with positive signed area are outlines, negative are holes. A hole
///   is attached to the smallest containing outline (ties: smaller bounding
///   box, then smaller starting vertex).
///
/// Total covered area always equals `cells.len() * cell_size.x * cell_size.z`;
/// duplicate input cells are ignored.
pub fn tile(cell_size: CellSize, cells: &[GridPos]) -> Vec<Region> {
    let cell_set: HashSet<GridPos> = cells.iter().copied().collect();
    let mut seeds: Vec<GridPos> = cell_set.iter().copied().collect();
    seeds.sort();

    let mut visited: HashSet<GridPos> = HashSet::with_capacity(cell_set.len());
    let mut regions = Vec::new();
    for &seed in &seeds {
        if visited.contains(&seed) {
            continue;
        }
        let component = collect_component(seed, &cell_set, &mut visited);
        regions.extend(tile_component(cell_size, &component));
    }
    regions
}

type Vertex = (i32, i32);
type Edge = (Vertex, Vertex);

fn collect_component(
    seed: GridPos,
    cells: &HashSet<GridPos>,
    visited: &mut HashSet<GridPos>,
) -> HashSet<GridPos> {
    let mut component = HashSet::new();
    let mut queue = VecDeque::from([seed]);
    visited.insert(seed);
    while let Some(cell) = queue.pop_front() {
        component.insert(cell);
        for neighbor in [
            GridPos::new(cell.x, cell.z - 1),
            GridPos::new(cell.x + 1, cell.z),
            GridPos::new(cell.x, cell.z + 1),
            GridPos::new(cell.x - 1, cell.z),
        ] {
            if cells.contains(&neighbor) && visited.insert(neighbor) {
                queue.push_back(neighbor);
            }
        }
    }
    component
}

fn tile_component(cell_size: CellSize, component: &HashSet<GridPos>) -> Vec<Region> {
    let edges = boundary_edges(component);
    let loops = trace_loops(&edges);

    let mut outlines: Vec<TracedLoop> = Vec::new();
    let mut holes: Vec<TracedLoop> = Vec::new();
    for vertices in loops {
        let vertices = simplify_collinear(vertices);
        let traced = TracedLoop::new(vertices);
        if traced.area2 > 0 {
            outlines.push(traced);
        } else {
            holes.push(traced);
        }
    }

    let mut assigned: Vec<Vec<TracedLoop>> = vec![Vec::new(); outlines.len()];
    for hole in holes {
        match owning_outline(&outlines, &hole) {
            Some(index) => assigned[index].push(hole),
            // Unreachable for any edge set produced above; dropping the loop
            // keeps the output well-formed if it ever happens.
            None => warn!(vertices = hole.vertices.len(), "region_hole_without_outline"),
        }
    }

    outlines
        .into_iter()
        .zip(assigned)
        .map(|(outline, outline_holes)| Region {
            outline: scale_ring(&outline.vertices, cell_size),
            holes: outline_holes
                .iter()
                .map(|hole| scale_ring(&hole.vertices, cell_size))
                .collect(),
        })
        .collect()
}

/// Directed edges of the unit grid that border exactly one member cell.
/// Directions keep the filled cell on the right of the edge.
fn boundary_edges(component: &HashSet<GridPos>) -> Vec<Edge> {
    let mut cells: Vec<GridPos> = component.iter().copied().collect();
    cells.sort();

    let mut edges = Vec::new();
    for cell in cells {
        let (x, z) = (cell.x, cell.z);
        if !component.contains(&GridPos::new(x, z - 1)) {
            edges.push(((x, z), (x + 1, z)));
        }
        if !component.contains(&GridPos::new(x + 1, z)) {
            edges.push(((x + 1, z), (x + 1, z + 1)));
        }
        if !component.contains(&GridPos::new(x, z + 1)) {
            edges.push(((x + 1, z + 1), (x, z + 1)));
        }
        if !component.contains(&GridPos::new(x - 1, z)) {
            edges.push(((x, z + 1), (x, z)));
        }
    }
    edges
}

fn trace_loops(edges: &[Edge]) -> Vec<Vec<Vertex>> {
    let mut outgoing: HashMap<Vertex, Vec<usize>> = HashMap::new();
    for (index, edge) in edges.iter().enumerate() {
        outgoing.entry(edge.0).or_default().push(index);
    }

    let mut order: Vec<usize> = (0..edges.len()).collect();
    order.sort_by_key(|&index| edges[index]);

    let mut used = vec![false; edges.len()];
    let mut loops = Vec::new();
    for &start in &order {
        if used[start] {
            continue;
        }

        let mut vertices = Vec::new();
        let mut current = start;
        loop {
            used[current] = true;
            let (from, to) = edges[current];
            vertices.push(from);
            let incoming = (to.0 - from.0, to.1 - from.1);
            match next_edge(to, incoming, &outgoing, &used, edges, start) {
                Some(next) if next == start => break,
                Some(next) => current = next,
                None => {
                    // Every boundary vertex balances in- and out-degree, so a
                    // dead end means the edge set was inconsistent.
                    warn!(vertex = ?to, "region_trace_dead_end");
                    break;
                }
            }
        }
        loops.push(vertices);
    }
    loops
}

/// Picks the continuation edge at `vertex`, preferring the sharpest left
/// turn relative to the incoming direction; at a pinch vertex that choice
/// keeps the walk on the boundary of the empty region it is already tracing.
/// The starting edge is admissible again so a loop through a pinch vertex
/// closes instead of leaking into a sibling loop.
fn next_edge(
    vertex: Vertex,
    incoming: (i32, i32),
    outgoing: &HashMap<Vertex, Vec<usize>>,
    used: &[bool],
    edges: &[Edge],
    start: usize,
) -> Option<usize> {
    let candidates = outgoing.get(&vertex)?;
    let right = (-incoming.1, incoming.0);
    let left = (incoming.1, -incoming.0);
    for wanted in [left, incoming, right] {
        for &index in candidates {
            if used[index] && index != start {
                continue;
            }
            let (from, to) = edges[index];
            if (to.0 - from.0, to.1 - from.1) == wanted {
                return Some(index);
            }
        }
    }
    None
}

fn simplify_collinear(vertices: Vec<Vertex>) -> Vec<Vertex> {
    let n = vertices.len();
    if n < 3 {
        return vertices;
    }
    let mut kept: Vec<Vertex> = Vec::with_capacity(n);
    for i in 0..n {
        let prev = vertices[(i + n - 1) % n];
        let here = vertices[i];
        let next = vertices[(i + 1) % n];
        let before = (here.0 - prev.0, here.1 - prev.1);
        let after = (next.0 - here.0, next.1 - here.1);
        if direction(before) != direction(after) {
            kept.push(here);
        }
    }
    rotate_to_min(kept)
}

fn direction(step: (i32, i32)) -> (i32, i32) {
    (step.0.signum(), step.1.signum())
}

fn rotate_to_min(vertices: Vec<Vertex>) -> Vec<Vertex> {
    let Some(min_index) = vertices
        .iter()
        .enumerate()
        .min_by_key(|(_, vertex)| **vertex)
        .map(|(index, _)| index)
    else {
        return vertices;
    };
    let mut rotated = Vec::with_capacity(vertices.len());
    rotated.extend_from_slice(&vertices[min_index..]);
    rotated.extend_from_slice(&vertices[..min_index]);
    rotated
}

#[derive(Debug, Clone)]
struct TracedLoop {
    vertices: Vec<Vertex>,
    area2: i64,
}

impl TracedLoop {
    fn new(vertices: Vec<Vertex>) -> Self {
        let area2 = signed_area2(&vertices);
        Self { vertices, area2 }
    }

    fn bounding_box_area(&self) -> i64 {
        let min_x = self.vertices.iter().map(|v| v.0).min().unwrap_or(0);
        let max_x = self.vertices.iter().map(|v| v.0).max().unwrap_or(0);
        let min_z = self.vertices.iter().map(|v| v.1).min().unwrap_or(0);
        let max_z = self.vertices.iter().map(|v| v.1).max().unwrap_or(0);
        i64::from(max_x - min_x) * i64::from(max_z - min_z)
    }
}

/// Twice the signed shoelace area; positive for outline winding.
fn signed_area2(vertices: &[Vertex]) -> i64 {
    let n = vertices.len();
    let mut sum = 0i64;
    for i in 0..n {
        let (x0, z0) = vertices[i];
        let (x1, z1) = vertices[(i + 1) % n];
        sum += i64::from(x0) * i64::from(z1) - i64::from(x1) * i64::from(z0);
    }
    sum
}

/// The cell just southeast of a hole loop's topmost-leftmost vertex is always
/// one of the enclosed cells, so its center works as a containment probe.
fn owning_outline(outlines: &[TracedLoop], hole: &TracedLoop) -> Option<usize> {
    let anchor = hole
        .vertices
        .iter()
        .copied()
        .min_by_key(|&(x, z)| (z, x))?;
    let probe_x = f64::from(anchor.0) + 0.5;
    let probe_z = f64::from(anchor.1) + 0.5;

    outlines
        .iter()
        .enumerate()
        .filter(|(_, outline)| contains_point(&outline.vertices, probe_x, probe_z))
        .min_by_key(|(_, outline)| {
            (
                outline.area2,
                outline.bounding_box_area(),
                outline.vertices.first().copied(),
            )
        })
        .map(|(index, _)| index)
}

fn contains_point(vertices: &[Vertex], px: f64, pz: f64) -> bool {
    let n = vertices.len();
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let (xi, zi) = (f64::from(vertices[i].0), f64::from(vertices[i].1));
        let (xj, zj) = (f64::from(vertices[j].0), f64::from(vertices[j].1));
        if (zi > pz) != (zj > pz) && px < (xj - xi) * (pz - zi) / (zj - zi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}

fn scale_ring(vertices: &[Vertex], cell_size: CellSize) -> Vec<[f64; 2]> {
    vertices
        .iter()
        .map(|&(x, z)| [f64::from(x) * cell_size.x, f64::from(z) * cell_size.z])
        .collect()
}
