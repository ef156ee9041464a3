use std::{env, error::Error, fs, path::PathBuf};

// Vertex shader: set 0 = per-frame camera block, written by the CPU every frame.
// Vertex layout matches `Vertex` in src/pipeline.rs:
//   - location 0: R32G32B32_SFLOAT (pos)
//   - location 1: R32G32B32_SFLOAT (color)
//   - location 2: R32G32B32_SFLOAT (normal)
//   - location 3: R32G32_SFLOAT    (uv)
const VS_SRC: &str = r#"
#version 450
layout(location = 0) in vec3 inPos;
layout(location = 1) in vec3 inColor;
layout(location = 2) in vec3 inNormal;
layout(location = 3) in vec2 inUv;

layout(set = 0, binding = 0) uniform Camera {
    mat4 view;
    mat4 proj;
} cam;

layout(location = 0) out vec3 vColor;
layout(location = 1) out vec2 vUv;

void main() {
    vec3 n = normalize(mat3(cam.view) * inNormal);
    float light = 0.65 + 0.35 * abs(dot(n, normalize(vec3(0.3, 0.5, 1.0))));
    vColor = inColor * light;
    vUv = inUv;
    gl_Position = cam.proj * cam.view * vec4(inPos, 1.0);
}
"#;

// Fragment shader: set 1 = static texture, modulated by the vertex color.
const FS_SRC: &str = r#"
#version 450
layout(set = 1, binding = 0) uniform sampler2D tex;

layout(location = 0) in vec3 vColor;
layout(location = 1) in vec2 vUv;
layout(location = 0) out vec4 outColor;

void main() {
    outColor = texture(tex, vUv) * vec4(vColor, 1.0);
}
"#;

fn main() -> Result<(), Box<dyn Error>> {
    let out = PathBuf::from(env::var("OUT_DIR")?);

    let comp = shaderc::Compiler::new().expect("shaderc compiler");
    let mut opts = shaderc::CompileOptions::new().expect("shaderc options");
    opts.set_target_env(
        shaderc::TargetEnv::Vulkan,
        shaderc::EnvVersion::Vulkan1_0 as u32,
    );
    opts.set_optimization_level(shaderc::OptimizationLevel::Performance);

    let shaders = [
        (VS_SRC, shaderc::ShaderKind::Vertex, "quad.vert"),
        (FS_SRC, shaderc::ShaderKind::Fragment, "quad.frag"),
    ];
    for (src, kind, name) in shaders {
        let spv = comp.compile_into_spirv(src, kind, name, "main", Some(&opts))?;
        fs::write(out.join(format!("{name}.spv")), spv.as_binary_u8())?;
    }

    // Re-run if this file changes (inline sources live here)
    println!("cargo:rerun-if-changed=build.rs");
    Ok(())
}
