use std::io::{self, Write};

pub fn show_menu() {
    println!("\n===========================================");
    println!("Pendulum Controller Link");
    println!("===========================================");
    println!("Select an option:");
    println!("1. Run Controller (simulated pendulum)");
    println!("2. Console Client");
    println!("3. Loopback Demo (controller + client)");
    println!("4. Dashboard");
    println!("5. Exit");
    println!("===========================================");
    print!("Choice (1-5): ");
    let _ = io::stdout().flush();
}

pub fn get_user_choice() -> Result<u32, std::num::ParseIntError> {
    read_line().trim().parse::<u32>()
}

pub fn prompt(text: &str) -> String {
    print!("{text}");
    let _ = io::stdout().flush();
    read_line().trim().to_string()
}

pub fn wait_for_enter() {
    println!("\nPress Enter to return to menu...");
    read_line();
}

fn read_line() -> String {
    let mut input = String::new();
    let _ = io::stdin().read_line(&mut input);
    input
}
