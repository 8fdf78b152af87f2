use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::{Debug, Formatter};

use bit_set::BitSet;
use instant::{Duration, Instant};
use smallvec::SmallVec;

/// The expected maximum number of variables (slots) appearing in a grid.
pub const MAX_VAR_COUNT: usize = 256;

/// The expected maximum length for a single slot.
pub const MAX_SLOT_LENGTH: usize = 21;

/// An identifier for a given variable, based on its index in the Crossword's `variables` field,
/// which also corresponds to an index in the solver's `domains` field.
pub type VarId = usize;

/// An identifier for a given word, based on its index in the Crossword's `words` field.
pub type WordId = usize;

/// Zero-indexed (row, col) coords for a cell in the grid, where row = 0 is the top row.
pub type GridCoord = (usize, usize);

/// Direction that a slot is facing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Across,
    Down,
}

/// A candidate value that can be chosen for a slot of matching length. Equality and hashing are
/// by content.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Word {
    pub string: String,
    pub letters: SmallVec<[char; MAX_SLOT_LENGTH]>,
}

impl Word {
    fn new(string: &str) -> Word {
        Word {
            string: string.to_string(),
            letters: string.chars().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.letters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.letters.is_empty()
    }
}

/// A maximal run of at least two fillable cells, requiring one word. Immutable once the
/// Crossword is built.
pub struct Variable {
    pub id: VarId,
    pub start: GridCoord,
    pub direction: Direction,
    pub length: usize,
    pub cells: SmallVec<[GridCoord; MAX_SLOT_LENGTH]>,
}

impl Debug for Variable {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Variable")
            .field("id", &self.id)
            .field("start", &self.start)
            .field("direction", &self.direction)
            .field("length", &self.length)
            .finish()
    }
}

/// The immutable problem model: grid dimensions, occupancy structure, the derived set of
/// variables, the deduplicated candidate word list, and the precomputed overlap/neighbor
/// relations between crossing variables.
pub struct Crossword {
    pub height: usize,
    pub width: usize,
    pub structure: Vec<Vec<bool>>,
    pub variables: Vec<Variable>,
    pub words: Vec<Word>,
    overlaps: HashMap<(VarId, VarId), (usize, usize)>,
    neighbors: Vec<SmallVec<[VarId; MAX_SLOT_LENGTH]>>,
}

impl Debug for Crossword {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Crossword")
            .field("height", &self.height)
            .field("width", &self.width)
            .field("variables", &self.variables)
            .field("words", &(["(", &self.words.len().to_string(), " entries)"].join("")))
            .finish()
    }
}

impl Crossword {
    /// Build a problem model from an occupancy grid (`true` = fillable cell) and a word list.
    /// Variables are derived from maximal runs of at least two fillable cells in each direction,
    /// and the word list is deduplicated by content. Panics on a malformed grid; the solver
    /// assumes a well-formed model and never re-validates it.
    pub fn new(
        height: usize,
        width: usize,
        structure: Vec<Vec<bool>>,
        words: &[String],
    ) -> Crossword {
        if structure.len() != height || structure.iter().any(|row| row.len() != width) {
            panic!("Grid structure doesn't match the stated dimensions");
        }

        let mut deduped: Vec<Word> = Vec::with_capacity(words.len());
        let mut seen: HashSet<&str> = HashSet::with_capacity(words.len());
        for word in words {
            if seen.insert(word.as_str()) {
                deduped.push(Word::new(word));
            }
        }

        let mut variables: Vec<Variable> = vec![];

        // Across runs.
        for row in 0..height {
            let mut col = 0;
            while col < width {
                if !structure[row][col] {
                    col += 1;
                    continue;
                }
                let start = col;
                while col < width && structure[row][col] {
                    col += 1;
                }
                let length = col - start;
                if length > 1 {
                    variables.push(Variable {
                        id: variables.len(),
                        start: (row, start),
                        direction: Direction::Across,
                        length,
                        cells: (0..length).map(|k| (row, start + k)).collect(),
                    });
                }
            }
        }

        // Down runs.
        for col in 0..width {
            let mut row = 0;
            while row < height {
                if !structure[row][col] {
                    row += 1;
                    continue;
                }
                let start = row;
                while row < height && structure[row][col] {
                    row += 1;
                }
                let length = row - start;
                if length > 1 {
                    variables.push(Variable {
                        id: variables.len(),
                        start: (start, col),
                        direction: Direction::Down,
                        length,
                        cells: (0..length).map(|k| (start + k, col)).collect(),
                    });
                }
            }
        }

        // Build a map from cell location to the variables occupying it, which we can then use to
        // calculate overlaps. A cell belongs to at most one run per direction, so each entry
        // holds at most two variables.
        let mut vars_by_cell: HashMap<GridCoord, SmallVec<[(VarId, usize); 2]>> = HashMap::new();
        for variable in &variables {
            for (cell_idx, &cell) in variable.cells.iter().enumerate() {
                vars_by_cell.entry(cell).or_default().push((variable.id, cell_idx));
            }
        }

        let mut overlaps: HashMap<(VarId, VarId), (usize, usize)> = HashMap::new();
        let mut neighbors: Vec<SmallVec<[VarId; MAX_SLOT_LENGTH]>> =
            variables.iter().map(|_| SmallVec::new()).collect();

        for occupants in vars_by_cell.values() {
            if let [(x, x_idx), (y, y_idx)] = occupants[..] {
                overlaps.insert((x, y), (x_idx, y_idx));
                overlaps.insert((y, x), (y_idx, x_idx));
                neighbors[x].push(y);
                neighbors[y].push(x);
            }
        }

        // Keep neighbor iteration order deterministic regardless of hash-map ordering above.
        for neighbor_list in &mut neighbors {
            neighbor_list.sort_unstable();
        }

        Crossword {
            height,
            width,
            structure,
            variables,
            words: deduped,
            overlaps,
            neighbors,
        }
    }

    /// Build a problem model from a string template, with `#` representing blocks and any other
    /// non-whitespace character representing a fillable cell.
    pub fn from_template(template: &str, words: &[String]) -> Crossword {
        let rows: Vec<Vec<bool>> = template
            .lines()
            .filter_map(|line| {
                let line = line.trim();
                if line.is_empty() {
                    None
                } else {
                    Some(line.chars().map(|c| c != '#').collect())
                }
            })
            .collect();

        let height = rows.len();
        let width = rows.first().map_or(0, |row| row.len());

        Crossword::new(height, width, rows, words)
    }

    /// The character positions at which two crossing variables must agree, as
    /// (index-in-x, index-in-y), or None if the variables don't share a cell.
    pub fn overlap(&self, x: VarId, y: VarId) -> Option<(usize, usize)> {
        self.overlaps.get(&(x, y)).copied()
    }

    /// All variables whose occupied cells intersect with the given variable's.
    pub fn neighbors(&self, var: VarId) -> &[VarId] {
        &self.neighbors[var]
    }
}

/// A partial mapping from variable to chosen word, built incrementally during search and
/// snapshotted/restored around each branch.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Assignment {
    words: Vec<Option<WordId>>,
    assigned_count: usize,
}

impl Assignment {
    fn new(var_count: usize) -> Assignment {
        Assignment {
            words: vec![None; var_count],
            assigned_count: 0,
        }
    }

    fn is_assigned(&self, var: VarId) -> bool {
        self.words[var].is_some()
    }

    fn insert(&mut self, var: VarId, word: WordId) {
        if self.words[var].is_none() {
            self.assigned_count += 1;
        }
        self.words[var] = Some(word);
    }

    fn is_complete(&self) -> bool {
        self.assigned_count == self.words.len()
    }

    fn uses_word(&self, word: WordId) -> bool {
        self.words.iter().any(|&assigned| assigned == Some(word))
    }

    fn entries(&self) -> impl Iterator<Item = (VarId, WordId)> + '_ {
        self.words
            .iter()
            .enumerate()
            .filter_map(|(var, &word)| word.map(|word| (var, word)))
    }
}

/// A struct tracking statistics about the solving process.
#[derive(Debug, Clone)]
pub struct Statistics {
    /// How many search frames we entered.
    pub states: u64,
    /// How many explored candidate branches we abandoned and rolled back.
    pub backtracks: u64,
    pub duration: Duration,
}

/// A complete assignment returned by a successful solve.
#[derive(Debug)]
pub struct Solution {
    /// The chosen word for each variable, indexed by `VarId`.
    pub words: Vec<WordId>,
    pub statistics: Statistics,
}

/// The CSP solving engine: holds the current domain store for a given problem model and runs
/// node consistency, AC-3 and backtracking search over it.
pub struct Solver<'a> {
    crossword: &'a Crossword,
    /// The current candidate word set for each variable, indexed by `VarId`. Bits are `WordId`s
    /// into the crossword's shared word list.
    domains: Vec<BitSet>,
    statistics: Statistics,
}

impl<'a> Solver<'a> {
    /// Create a solver with every variable's domain seeded with the full word list.
    pub fn new(crossword: &'a Crossword) -> Solver<'a> {
        let full_domain: BitSet = (0..crossword.words.len()).collect();

        Solver {
            domains: crossword.variables.iter().map(|_| full_domain.clone()).collect(),
            crossword,
            statistics: Statistics {
                states: 0,
                backtracks: 0,
                duration: Duration::from_millis(0),
            },
        }
    }

    pub fn statistics(&self) -> &Statistics {
        &self.statistics
    }

    /// Enforce node and arc consistency, then run backtracking search. Returns None if the
    /// instance is unsatisfiable; that's a defined terminal outcome, not an error.
    pub fn solve(&mut self) -> Option<Solution> {
        let start = Instant::now();

        self.enforce_node_consistency();
        if !self.ac3(None) {
            self.statistics.duration = start.elapsed();
            return None;
        }

        let mut assignment = Assignment::new(self.crossword.variables.len());
        let result = self.backtrack(&mut assignment);

        self.statistics.duration = start.elapsed();

        result.map(|words| Solution {
            words,
            statistics: self.statistics.clone(),
        })
    }

    /// Remove from every variable's domain any word whose length differs from the variable's
    /// length. Runs exactly once, before any arc consistency; afterwards the word-length
    /// invariant is assumed to hold everywhere.
    fn enforce_node_consistency(&mut self) {
        for variable in &self.crossword.variables {
            let doomed: Vec<WordId> = self.domains[variable.id]
                .iter()
                .filter(|&word| self.crossword.words[word].len() != variable.length)
                .collect();

            for word in doomed {
                self.domains[variable.id].remove(word);
            }
        }
    }

    /// Return true if assigning `word_x` to `x` and `word_y` to `y` would disagree at the
    /// variables' shared cell. Variables that don't cross never conflict.
    fn conflict(&self, x: VarId, y: VarId, word_x: WordId, word_y: WordId) -> bool {
        match self.crossword.overlap(x, y) {
            Some((x_idx, y_idx)) => {
                self.crossword.words[word_x].letters[x_idx]
                    != self.crossword.words[word_y].letters[y_idx]
            }
            None => false,
        }
    }

    /// Make variable `x` arc consistent with variable `y` by removing from x's domain every word
    /// with no supporting word in y's domain at the overlap position. Returns whether x's domain
    /// changed.
    fn revise(&mut self, x: VarId, y: VarId) -> bool {
        let (x_idx, y_idx) = match self.crossword.overlap(x, y) {
            Some(overlap) => overlap,
            None => return false,
        };

        let mut revised = false;
        let candidates: Vec<WordId> = self.domains[x].iter().collect();

        for word_x in candidates {
            let letter = self.crossword.words[word_x].letters[x_idx];
            let supported = self.domains[y]
                .iter()
                .any(|word_y| self.crossword.words[word_y].letters[y_idx] == letter);

            if !supported {
                self.domains[x].remove(word_x);
                revised = true;
            }
        }

        revised
    }

    /// Propagate pairwise constraints until fixpoint or domain collapse. If `arcs` is None,
    /// start from every ordered neighboring pair in the problem; otherwise start from the given
    /// arcs. Whenever an arc (x, y) shrinks x's domain, every arc (z, x) for the other neighbors
    /// z of x is re-enqueued, since x's shrinkage may invalidate their consistency. Returns false
    /// as soon as any domain empties; the caller must not search past that point without
    /// restoring state.
    fn ac3(&mut self, arcs: Option<Vec<(VarId, VarId)>>) -> bool {
        let mut queue: VecDeque<(VarId, VarId)> = match arcs {
            Some(arcs) => arcs.into(),
            None => self
                .crossword
                .variables
                .iter()
                .flat_map(|variable| {
                    self.crossword
                        .neighbors(variable.id)
                        .iter()
                        .map(move |&neighbor| (variable.id, neighbor))
                })
                .collect(),
        };

        while let Some((x, y)) = queue.pop_front() {
            if self.revise(x, y) {
                if self.domains[x].is_empty() {
                    return false;
                }
                for &z in self.crossword.neighbors(x) {
                    if z != y {
                        queue.push_back((z, x));
                    }
                }
            }
        }

        true
    }

    /// Return true if extending `assignment` with (var -> word) keeps the whole assignment
    /// globally consistent: all chosen words distinct, every word's length matching its
    /// variable's length, and every pair of assigned crossing variables agreeing at its overlap.
    fn consistent(&self, assignment: &Assignment, var: VarId, word: WordId) -> bool {
        let entries: SmallVec<[(VarId, WordId); MAX_VAR_COUNT]> = assignment
            .entries()
            .chain(std::iter::once((var, word)))
            .collect();

        let mut used = BitSet::with_capacity(self.crossword.words.len());
        for &(entry_var, entry_word) in &entries {
            if !used.insert(entry_word) {
                return false;
            }
            if self.crossword.words[entry_word].len() != self.crossword.variables[entry_var].length
            {
                return false;
            }
        }

        for &(x, word_x) in &entries {
            for &(y, word_y) in &entries {
                if x != y && self.conflict(x, y, word_x, word_y) {
                    return false;
                }
            }
        }

        true
    }

    /// Select the unassigned variable with the fewest remaining candidate words, breaking ties
    /// by highest degree. Remaining ties fall to whichever tied variable comes first.
    fn select_unassigned_variable(&self, assignment: &Assignment) -> VarId {
        self.crossword
            .variables
            .iter()
            .map(|variable| variable.id)
            .filter(|&var| !assignment.is_assigned(var))
            .min_by_key(|&var| {
                (
                    self.domains[var].len(),
                    std::cmp::Reverse(self.crossword.neighbors(var).len()),
                )
            })
            .expect("No unassigned variable in an incomplete assignment?")
    }

    /// Order the variable's candidate words by least-constraining-value: ascending by the number
    /// of unassigned neighbors whose domain currently contains that exact word. The sort is
    /// stable, so equal counts keep domain iteration order.
    fn order_domain_values(&self, var: VarId, assignment: &Assignment) -> Vec<WordId> {
        let neighbors = self.crossword.neighbors(var);

        let mut candidates: Vec<WordId> = self.domains[var].iter().collect();
        candidates.sort_by_key(|&word| {
            neighbors
                .iter()
                .filter(|&&neighbor| {
                    !assignment.is_assigned(neighbor) && self.domains[neighbor].contains(word)
                })
                .count()
        });

        candidates
    }

    /// Re-establish arc consistency for the arcs (y, var) of every unassigned neighbor y after
    /// a tentative assignment to `var`. Returns false if any domain collapses. On success,
    /// opportunistically commits any singleton-domain variable's sole remaining word into the
    /// assignment as a forced move, provided that word isn't already used.
    fn inference(&mut self, var: VarId, assignment: &mut Assignment) -> bool {
        let arcs: Vec<(VarId, VarId)> = self
            .crossword
            .neighbors(var)
            .iter()
            .filter(|&&neighbor| !assignment.is_assigned(neighbor))
            .map(|&neighbor| (neighbor, var))
            .collect();

        if !self.ac3(Some(arcs)) {
            return false;
        }

        for forced_var in 0..self.crossword.variables.len() {
            if self.domains[forced_var].len() == 1 && !assignment.is_assigned(forced_var) {
                let word = self.domains[forced_var].iter().next().unwrap();
                if !assignment.uses_word(word) {
                    assignment.insert(forced_var, word);
                }
            }
        }

        true
    }

    /// Explore partial assignments depth-first, restoring the assignment and the whole domain
    /// store from a snapshot whenever a branch fails. Returns the chosen word per variable, or
    /// None if this subtree has no solution.
    ///
    /// Note that a failed inference step fails this entire call frame without trying the
    /// remaining candidate words; the caller then restores its own snapshot and moves on to its
    /// next candidate. See DESIGN.md for context on this aggressive pruning.
    fn backtrack(&mut self, assignment: &mut Assignment) -> Option<Vec<WordId>> {
        self.statistics.states += 1;

        if assignment.is_complete() {
            return Some(assignment.entries().map(|(_, word)| word).collect());
        }

        let var = self.select_unassigned_variable(assignment);

        for word in self.order_domain_values(var, assignment) {
            let saved_assignment = assignment.clone();
            let saved_domains = self.domains.clone();

            if self.consistent(assignment, var, word) {
                assignment.insert(var, word);
                self.domains[var].clear();
                self.domains[var].insert(word);

                if !self.inference(var, assignment) {
                    return None;
                }

                if let Some(solution) = self.backtrack(assignment) {
                    return Some(solution);
                }

                self.statistics.backtracks += 1;
            }

            *assignment = saved_assignment;
            self.domains = saved_domains;
        }

        None
    }
}

/// Turn the given crossword and complete assignment into a rendered string, with `█` for
/// blocked cells.
pub fn render_grid(crossword: &Crossword, words: &[WordId]) -> String {
    let mut letters: Vec<Vec<char>> = crossword
        .structure
        .iter()
        .map(|row| row.iter().map(|&open| if open { ' ' } else { '█' }).collect())
        .collect();

    for (variable, &word) in crossword.variables.iter().zip(words) {
        for (&(row, col), &letter) in variable.cells.iter().zip(&crossword.words[word].letters) {
            letters[row][col] = letter;
        }
    }

    letters
        .into_iter()
        .map(|row| row.into_iter().collect::<String>())
        .collect::<Vec<_>>()
        .join("\n")
}
