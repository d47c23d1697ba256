fn main() -> anyhow::Result<()> {
    mission_control_lib::run()
}
