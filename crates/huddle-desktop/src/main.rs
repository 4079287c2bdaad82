fn main() {
    huddle_desktop::run();
}
