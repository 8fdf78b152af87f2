use crossfill::{render_grid, Crossword, Solver};
use std::fs;

fn load_word_list(path: &str) -> Vec<String> {
    fs::read_to_string(path)
        .expect("Something went wrong reading the word list")
        .lines()
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
        .collect()
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    if args.len() != 3 && args.len() != 4 {
        eprintln!("Usage: crossfill structure words [output]");
        std::process::exit(1);
    }

    let template = fs::read_to_string(&args[1])
        .expect("Something went wrong reading the grid structure");
    let words = load_word_list(&args[2]);

    let crossword = Crossword::from_template(&template, &words);
    let mut solver = Solver::new(&crossword);

    match solver.solve() {
        Some(solution) => {
            let display_grid = render_grid(&crossword, &solution.words);

            println!("{:?}", solution.statistics);
            println!("{}", display_grid);

            if let Some(output) = args.get(3) {
                fs::write(output, display_grid).expect("Unable to write file");
                println!("written file to {}", output);
            }
        }
        None => println!("No solution."),
    }
}
